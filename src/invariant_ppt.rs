//! Runtime invariants that tests can prove were exercised.
//!
//! Code states an invariant with [`assert_invariant!`]. Each evaluation is
//! counted per thread, and a test calls [`contract_test`] afterwards to fail
//! if a listed invariant was never evaluated on its thread.
//!
//! ```rust,ignore
//! spyglass::assert_invariant!(
//!     items.len() <= capacity,
//!     "Consumer queue never exceeds its capacity",
//!     "broadcast::queue"
//! );
//!
//! spyglass::invariant_ppt::contract_test("fan-out", &[
//!     "Consumer queue never exceeds its capacity",
//! ]);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CHECKED: RefCell<HashMap<&'static str, u64>> = RefCell::new(HashMap::new());
}

/// Check `$condition`, panicking with `$message` (and `$context`) when false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::check($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::check($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn check(condition: bool, message: &'static str, context: Option<&str>) {
    CHECKED.with(|checked| *checked.borrow_mut().entry(message).or_insert(0) += 1);
    if !condition {
        panic!(
            "INVARIANT VIOLATION [{}]: {}",
            context.unwrap_or("unknown"),
            message
        );
    }
}

/// How often `message` was evaluated on this thread since the last clear.
pub fn times_checked(message: &str) -> u64 {
    CHECKED.with(|checked| checked.borrow().get(message).copied().unwrap_or(0))
}

/// Panics unless every invariant in `required` was evaluated on this thread.
pub fn contract_test(test_name: &str, required: &[&str]) {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|message| times_checked(message) == 0)
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: never checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_invariant_log() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}
