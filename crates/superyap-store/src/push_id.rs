//! Chronologically sortable record keys.
//!
//! Same layout as realtime-database push ids: 8 characters of millisecond
//! timestamp followed by 12 random characters, over an alphabet whose byte
//! order matches its value order. Keys from one generator sort in creation
//! order, also within a single millisecond.

use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIMESTAMP_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

pub const PUSH_ID_LEN: usize = TIMESTAMP_CHARS + RANDOM_CHARS;

#[derive(Debug)]
pub struct PushIdGenerator {
    last_timestamp: i64,
    last_random: [u8; RANDOM_CHARS],
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self {
            last_timestamp: i64::MIN,
            last_random: [0; RANDOM_CHARS],
        }
    }
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next key for a record created at `now_ms`. A clock that moves
    /// backwards is treated as standing still.
    pub fn next_id(&mut self, now_ms: i64) -> String {
        let now = now_ms.max(self.last_timestamp).max(0);
        let same_millisecond = now == self.last_timestamp;
        self.last_timestamp = now;

        if same_millisecond {
            // Increment the random suffix as a base-64 number.
            for digit in self.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::thread_rng();
            for digit in self.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }

        let mut id = [0u8; PUSH_ID_LEN];
        let mut remaining = now as u64;
        for slot in id[..TIMESTAMP_CHARS].iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        for (slot, digit) in id[TIMESTAMP_CHARS..].iter_mut().zip(self.last_random) {
            *slot = PUSH_CHARS[digit as usize];
        }

        id.iter().map(|&b| b as char).collect()
    }
}
