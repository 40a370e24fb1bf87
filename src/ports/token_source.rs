/// TokenSource defines the port for the session collaborator that owns the bearer token.
///
/// Implementations must be cheap to call; the gateway asks once per attempt so that a
/// token refreshed between retries is picked up.
pub trait TokenSource: Send + Sync + 'static {
    /// The current access token, or `None` for unauthenticated calls.
    fn access_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}
