use super::{Bus, Frame, Subscription};
use async_trait::async_trait;
use island_error::{BusError, RpcResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::warn;

const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus with Redis pub/sub semantics: fire-and-forget delivery to
/// every subscription whose pattern matches at publish time.
#[derive(Clone)]
pub struct MemoryBus {
    frames: broadcast::Sender<Frame>,
    /// Bumped to sever every live subscription, like a dropped connection
    generation: Arc<watch::Sender<u64>>,
    refuse_publish: Arc<AtomicBool>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity);
        let (generation, _) = watch::channel(0);
        Self {
            frames,
            generation: Arc::new(generation),
            refuse_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    /// End every open subscription as if the connection was lost
    pub fn sever_subscriptions(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Make subsequent publishes fail, for exercising the dispatch error path
    pub fn set_refuse_publish(&self, refuse: bool) {
        self.refuse_publish.store(refuse, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.frames.receiver_count()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> RpcResult<()> {
        if self.refuse_publish.load(Ordering::SeqCst) {
            return Err(BusError::Redis("publish refused".to_string()));
        }
        // No subscribers is not an error on a pub/sub bus
        let _ = self.frames.send(Frame::new(channel, payload));
        Ok(())
    }

    async fn subscribe(&self, patterns: &[String]) -> RpcResult<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            frames: self.frames.subscribe(),
            generation: self.generation.subscribe(),
            patterns: patterns.to_vec(),
            active: true,
        }))
    }
}

struct MemorySubscription {
    frames: broadcast::Receiver<Frame>,
    generation: watch::Receiver<u64>,
    patterns: Vec<String>,
    active: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.active {
                return None;
            }
            tokio::select! {
                _ = self.generation.changed() => {
                    self.active = false;
                    return None;
                }
                received = self.frames.recv() => match received {
                    Ok(frame) => {
                        if self.patterns.iter().any(|p| glob_match(p, &frame.channel)) {
                            return Some(frame);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Memory bus subscriber lagged, frames lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.active = false;
                        return None;
                    }
                },
            }
        }
    }

    async fn unsubscribe(&mut self) -> RpcResult<()> {
        self.active = false;
        self.patterns.clear();
        Ok(())
    }
}

/// Redis-style glob match supporting `*` (any run) and `?` (one character)
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
