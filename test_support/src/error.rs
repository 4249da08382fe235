//! Error-chain rendering for assertions on nested failures.

use std::error::Error;

/// Collect `e` and each of its sources, outermost first.
pub fn error_chain(e: &(dyn Error + 'static)) -> Vec<String> {
    let mut current: Option<&(dyn Error + 'static)> = Some(e);
    std::iter::from_fn(|| {
        let err = current?;
        current = err.source();
        Some(err.to_string())
    })
    .collect()
}

/// Join [`error_chain`] with `": "` so a whole chain can be matched at once.
pub fn display_error_chain(e: &(dyn Error + 'static)) -> String {
    error_chain(e).join(": ")
}
