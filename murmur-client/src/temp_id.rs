use std::cell::{Cell, RefCell};

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Source of the placeholder ids given to optimistically created entities
pub trait TempIdSource {
    fn generate(&self, prefix: &str) -> String;
}

/// Random v4 uuids from the OS, degrading to [`TimeRandomIds`] when the OS has no random source
pub struct SystemIds {
    fallback: TimeRandomIds,
}

impl SystemIds {
    pub fn new() -> SystemIds {
        SystemIds {
            fallback: TimeRandomIds::new(),
        }
    }
}

impl Default for SystemIds {
    fn default() -> SystemIds {
        SystemIds::new()
    }
}

impl TempIdSource for SystemIds {
    fn generate(&self, prefix: &str) -> String {
        let mut bytes = [0u8; 16];
        match getrandom::getrandom(&mut bytes) {
            Ok(()) => {
                let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
                format!("{prefix}-{}", id.hyphenated())
            }
            Err(err) => {
                tracing::debug!(?err, "os random source unavailable, using time-seeded ids");
                self.fallback.generate(prefix)
            }
        }
    }
}

/// `<prefix>-<random base36>-<unix millis>` from a time-seeded generator
pub struct TimeRandomIds {
    rng: RefCell<StdRng>,
}

impl TimeRandomIds {
    pub fn new() -> TimeRandomIds {
        let now = Utc::now();
        let seed = (now.timestamp_millis() as u64) ^ ((now.timestamp_subsec_nanos() as u64) << 32);
        TimeRandomIds {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for TimeRandomIds {
    fn default() -> TimeRandomIds {
        TimeRandomIds::new()
    }
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut res = Vec::new();
    loop {
        res.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    res.iter().rev().map(|d| char::from(*d)).collect()
}

impl TempIdSource for TimeRandomIds {
    fn generate(&self, prefix: &str) -> String {
        let n: u64 = self.rng.borrow_mut().gen();
        format!("{prefix}-{}-{}", base36(n), Utc::now().timestamp_millis())
    }
}

/// `<prefix>-1`, `<prefix>-2`, ...: predictable ids for tests and replays
#[derive(Default)]
pub struct SequentialIds(Cell<u64>);

impl SequentialIds {
    pub fn new() -> SequentialIds {
        SequentialIds::default()
    }
}

impl TempIdSource for SequentialIds {
    fn generate(&self, prefix: &str) -> String {
        let n = self.0.get() + 1;
        self.0.set(n);
        format!("{prefix}-{n}")
    }
}
