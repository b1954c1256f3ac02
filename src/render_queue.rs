use crate::device::RenderDevice;

// Commands are closures executed on the render thread, in submission order.
// Every texture mutation in the crate goes through one of these.
pub type RenderCommand = Box<dyn FnOnce(&mut dyn RenderDevice) + Send>;

/// Sending half of the render command stream. Cheap to clone; all clones
/// feed the same ordered stream.
#[derive(Clone)]
pub struct RenderQueue {
    tx: crossbeam_channel::Sender<RenderCommand>,
}

impl RenderQueue {
    pub fn enqueue<F>(&self, command: F)
    where
        F: FnOnce(&mut dyn RenderDevice) + Send + 'static,
    {
        // A disconnected receiver means the render thread is gone; commands
        // issued during teardown are dropped.
        let _ = self.tx.send(Box::new(command));
    }
}

/// Receiving half, owned by whichever thread plays the render thread role.
pub struct RenderCommandStream {
    rx: crossbeam_channel::Receiver<RenderCommand>,
}

impl RenderCommandStream {
    /// Execute every command submitted so far, then return.
    pub fn run_pending(&self, device: &mut dyn RenderDevice) -> usize {
        let mut count = 0;
        while let Ok(command) = self.rx.try_recv() {
            command(device);
            count += 1;
        }
        count
    }

    /// Run a dedicated render thread until every `RenderQueue` clone has
    /// been dropped. Returns the device for inspection on join.
    pub fn spawn(self, mut device: Box<dyn RenderDevice + Send>) -> RenderThread {
        let join = std::thread::spawn(move || {
            let mut count: u64 = 0;
            while let Ok(command) = self.rx.recv() {
                command(device.as_mut());
                count += 1;
            }
            log::info!("Render thread exiting after {} commands", count);
            device
        });
        RenderThread { join }
    }
}

pub struct RenderThread {
    join: std::thread::JoinHandle<Box<dyn RenderDevice + Send>>,
}

impl RenderThread {
    pub fn join(self) -> Box<dyn RenderDevice + Send> {
        self.join.join().expect("render thread panicked")
    }
}

pub fn render_channel() -> (RenderQueue, RenderCommandStream) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (RenderQueue { tx }, RenderCommandStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use std::sync::{Arc, Mutex};

    #[test]
    fn commands_run_in_submission_order() {
        let (queue, stream) = render_channel();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let order = order.clone();
            queue.enqueue(move |_| order.lock().unwrap().push(i));
        }
        let mut device = SoftwareDevice::new();
        assert_eq!(stream.run_pending(&mut device), 100);
        assert_eq!(*order.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn order_holds_across_clones() {
        let (queue, stream) = render_channel();
        let order = Arc::new(Mutex::new(Vec::new()));
        let other = queue.clone();
        for i in 0..10 {
            let a = order.clone();
            let b = order.clone();
            queue.enqueue(move |_| a.lock().unwrap().push(2 * i));
            other.enqueue(move |_| b.lock().unwrap().push(2 * i + 1));
        }
        let mut device = SoftwareDevice::new();
        stream.run_pending(&mut device);
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn render_thread_drains_and_returns_device() {
        let (queue, stream) = render_channel();
        let thread = stream.spawn(Box::new(SoftwareDevice::new()));
        let hits = Arc::new(Mutex::new(0));
        for _ in 0..5 {
            let hits = hits.clone();
            queue.enqueue(move |_| *hits.lock().unwrap() += 1);
        }
        drop(queue);
        let _device = thread.join();
        assert_eq!(*hits.lock().unwrap(), 5);
    }
}
