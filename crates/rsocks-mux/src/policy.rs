/// What an accept loop does when `accept()` fails
///
/// Different roles want different answers: a flaky rendezvous accept should
/// not take the trusted side down, while the public front treats a broken
/// listener as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptPolicy {
    /// Return the error and stop the loop
    Fatal,
    /// Log the error and keep accepting
    Continue,
}

impl AcceptPolicy {
    pub fn is_fatal(self) -> bool {
        matches!(self, AcceptPolicy::Fatal)
    }
}
