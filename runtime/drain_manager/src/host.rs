/// The process hosting the listener that is being drained.
///
/// The drain manager never stops listeners or closes sockets itself: it relies on
/// its host to act on its decisions.
pub trait HostProcess: Send + Sync + 'static {
    /// Terminate the process, e.g. by asking the parent of a hot restart to exit.
    ///
    /// Invoked once, when the parent shutdown grace period expires.
    fn terminate(&self) -> Result<(), anyhow::Error>;

    /// The maximum number of connections the listener accepts.
    ///
    /// It is used to convert a connection drain percentage into an absolute limit.
    fn connection_ceiling(&self) -> u64;
}
