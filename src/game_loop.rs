use crate::error::{LinkError, Result};
use crossbeam::channel::{self, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const DEFAULT_FPS: u32 = 30;

type Updater = Arc<dyn Fn(f64) + Send + Sync>;

struct LoopTask {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Fixed-tick loop calling its updater with the seconds elapsed since the
/// previous tick.
pub struct GameLoop {
    fps: u32,
    updater: Updater,
    task: Mutex<Option<LoopTask>>,
}

impl GameLoop {
    pub fn new<F>(updater: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            fps: DEFAULT_FPS,
            updater: Arc::new(updater),
            task: Mutex::new(None),
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Starting a running loop is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Ok(());
        }
        let (stop, stopped) = channel::bounded::<()>(1);
        let ticker = channel::tick(self.interval());
        let updater = Arc::clone(&self.updater);
        let fps = self.fps;
        let handle = thread::Builder::new()
            .name("link-game-loop".to_string())
            .spawn(move || {
                info!("game loop is starting by {} fps", fps);
                let mut last = Instant::now();
                loop {
                    crossbeam::select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            let now = Instant::now();
                            let delta = now.duration_since(last).as_secs_f64();
                            last = now;
                            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| updater(delta))) {
                                error!("game loop update panic with {:?}\n{:?}", payload, backtrace::Backtrace::new());
                            }
                        }
                    }
                }
                info!("game loop is stopped");
            })
            .map_err(|e| LinkError::Transport(format!("spawn game loop: {}", e)))?;
        *task = Some(LoopTask { stop, handle });
        Ok(())
    }

    /// Stops the loop and waits for the running update to finish.
    pub fn close(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(task) = task else {
            return;
        };
        let _ = task.stop.try_send(());
        if task.handle.thread().id() != thread::current().id() && task.handle.join().is_err() {
            warn!("game loop exited with panic");
        }
    }
}

impl Drop for GameLoop {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ticks_stop_after_close() {
        assert_eq!(GameLoop::new(|_| {}).fps(), DEFAULT_FPS);

        let ticks = Arc::new(AtomicUsize::new(0));
        let deltas = Arc::new(Mutex::new(Vec::new()));
        let (counter, sink) = (ticks.clone(), deltas.clone());
        let game = GameLoop::new(move |delta| {
            counter.fetch_add(1, Ordering::SeqCst);
            sink.lock().unwrap().push(delta);
        })
        .with_fps(200);
        assert_eq!(game.interval(), Duration::from_millis(5));

        game.start().unwrap();
        game.start().unwrap();
        assert!(game.is_running());
        thread::sleep(Duration::from_millis(100));
        game.close();
        assert!(!game.is_running());

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen > 3);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        assert!(deltas.lock().unwrap().iter().all(|d| *d > 0.0 && *d < 1.0));
    }

    #[test]
    fn test_panicking_update_keeps_loop_alive() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let game = GameLoop::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first frame failed");
            }
        })
        .with_fps(100);
        game.start().unwrap();
        thread::sleep(Duration::from_millis(80));
        drop(game);
        assert!(ticks.load(Ordering::SeqCst) > 1);
    }
}
