//! 异步虚拟磁盘：请求队列 + 单个工作线程

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::{BlockDevice, IoKind, IoRequest};

#[derive(Debug)]
pub struct VirtualDisk {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    dev: Arc<dyn BlockDevice>,
    queue: Mutex<Queue>,
    /// 队列非空或停机时通知工作线程
    cond: Condvar,
}

struct Queue {
    requests: VecDeque<(Arc<dyn IoRequest>, IoKind)>,
    running: bool,
}

impl core::fmt::Debug for Shared {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("Shared")
            .field("pending", &queue.requests.len())
            .field("running", &queue.running)
            .finish()
    }
}

impl VirtualDisk {
    /// 在卷 `dev` 之上启动工作线程
    pub fn new(dev: Arc<dyn BlockDevice>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            dev,
            queue: Mutex::new(Queue {
                requests: VecDeque::new(),
                running: true,
            }),
            cond: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("virtual-disk".into())
                .spawn(move || shared.run())?
        };

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 底层卷
    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.shared.dev
    }

    /// 把请求排入队列后立即返回。
    /// 停机之后提交的请求在调用者线程上同步完成。
    pub fn submit(&self, request: Arc<dyn IoRequest>, kind: IoKind) {
        let mut queue = self.shared.queue.lock();
        if !queue.running {
            drop(queue);
            log::warn!(
                "disk terminated, serving {kind:?} of block {} inline",
                request.block_id()
            );
            request.io_complete(kind, &*self.shared.dev);
            return;
        }

        log::trace!("queue {kind:?} of block {}", request.block_id());
        queue.requests.push_back((request, kind));
        self.shared.cond.notify_one();
    }

    /// 停止工作线程。队列中剩余的请求会先被完成。
    pub fn terminate(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.running {
                return;
            }
            queue.running = false;
            self.shared.cond.notify_all();
        }

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        // 最后一个引用可能恰好在工作线程里释放
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            log::error!("virtual disk worker panicked");
        }
    }
}

impl Drop for VirtualDisk {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl Shared {
    fn run(&self) {
        loop {
            let (request, kind) = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(next) = queue.requests.pop_front() {
                        break next;
                    }
                    if !queue.running {
                        log::debug!("virtual disk worker stopped");
                        return;
                    }
                    self.cond.wait(&mut queue);
                }
            };

            request.io_complete(kind, &*self.dev);
        }
    }
}
