use tokio::sync::watch;

/// Source of the signed-in user's stable identifier.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<String>;

    /// Every sign-in and sign-out, latest value first.
    fn identity_changes(&self) -> watch::Receiver<Option<String>>;
}

/// Identity driven directly by the embedding application.
pub struct ManualIdentity {
    current: watch::Sender<Option<String>>,
}

impl ManualIdentity {
    pub fn new(initial: Option<String>) -> Self {
        let (current, _) = watch::channel(initial);
        Self { current }
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    pub fn sign_in(&self, uid: impl Into<String>) {
        self.current.send_replace(Some(uid.into()));
    }

    pub fn sign_out(&self) {
        self.current.send_replace(None);
    }
}

impl IdentityProvider for ManualIdentity {
    fn current_identity(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    fn identity_changes(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }
}
