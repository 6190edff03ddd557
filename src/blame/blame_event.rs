use super::{BlameError, CommitInfo};

/// A notification from a running blame process.
///
/// `Commit` and `Line` may arrive in any relative order.
/// `End` is always the last one.
#[derive(Clone, Debug)]
pub enum BlameEvent {
    Commit { hash: String, info: CommitInfo },
    Line { line_number: usize, hash: String },
    End(Result<(), BlameError>),
}
