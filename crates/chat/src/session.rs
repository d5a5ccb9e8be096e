use parley_storage::{AuthEvent, Identity, StoreResult, UserId};

/// Monotonic counter bumped on every identity change.
///
/// Async completions carry the epoch they started under and are dropped when it moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionEpoch(pub u64);

impl SessionEpoch {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Signed-in identity passed explicitly to every component that needs the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub identity: Identity,
    pub epoch: SessionEpoch,
}

impl SessionContext {
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GateState {
    /// Startup session check still in flight; render neither prompt nor chat.
    #[default]
    Checking,
    Unauthenticated,
    Authenticated(SessionContext),
}

impl GateState {
    pub fn context(&self) -> Option<&SessionContext> {
        match self {
            Self::Authenticated(context) => Some(context),
            Self::Checking | Self::Unauthenticated => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Checking)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateTransition {
    Unchanged,
    SignedIn(SessionContext),
    SignedOut,
}

#[derive(Debug, Default)]
pub struct SessionGate {
    state: GateState,
    epoch: SessionEpoch,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.state.context()
    }

    pub fn epoch(&self) -> SessionEpoch {
        self.epoch
    }

    pub fn is_current(&self, epoch: SessionEpoch) -> bool {
        self.epoch == epoch
    }

    /// Applies the startup session check.
    ///
    /// Ignored once the gate is resolved: an auth event that arrived first is newer truth.
    /// A failed check counts as signed out.
    pub fn resolve_startup(&mut self, result: StoreResult<Option<Identity>>) -> GateTransition {
        if self.state.is_resolved() {
            tracing::debug!("startup session check finished after gate resolved; ignoring");
            return GateTransition::Unchanged;
        }

        match result {
            Ok(Some(identity)) => self.enter(identity),
            Ok(None) => self.leave(),
            Err(error) => {
                tracing::warn!(stage = error.stage(), "startup session check failed: {error}");
                self.leave()
            }
        }
    }

    /// Re-reads the store's session after the auth feed dropped events.
    ///
    /// Unlike the startup check a failure keeps the current state.
    pub fn reconcile(&mut self, result: StoreResult<Option<Identity>>) -> GateTransition {
        match result {
            Ok(Some(identity)) => self.enter(identity),
            Ok(None) => self.leave(),
            Err(error) => {
                tracing::warn!(stage = error.stage(), "session resync failed: {error}");
                GateTransition::Unchanged
            }
        }
    }

    pub fn apply_auth_event(&mut self, event: AuthEvent) -> GateTransition {
        match event {
            AuthEvent::SignedIn(identity) => self.enter(identity),
            AuthEvent::SignedOut => self.leave(),
        }
    }

    fn enter(&mut self, identity: Identity) -> GateTransition {
        if let GateState::Authenticated(context) = &self.state
            && context.identity == identity
        {
            return GateTransition::Unchanged;
        }

        self.epoch = self.epoch.next();
        let context = SessionContext {
            identity,
            epoch: self.epoch,
        };
        tracing::info!(user_id = %context.user_id(), epoch = self.epoch.0, "session established");
        self.state = GateState::Authenticated(context.clone());
        GateTransition::SignedIn(context)
    }

    fn leave(&mut self) -> GateTransition {
        if matches!(self.state, GateState::Unauthenticated) {
            return GateTransition::Unchanged;
        }

        self.epoch = self.epoch.next();
        tracing::info!(epoch = self.epoch.0, "session cleared");
        self.state = GateState::Unauthenticated;
        GateTransition::SignedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_storage::StoreError;

    fn identity(email: &str) -> Identity {
        Identity {
            user_id: UserId::new_v7(),
            email: email.to_string(),
        }
    }

    #[test]
    fn gate_stays_checking_until_startup_resolves() {
        let mut gate = SessionGate::new();
        assert_eq!(gate.state(), &GateState::Checking);
        assert!(!gate.state().is_resolved());

        let ada = identity("ada@example.com");
        let transition = gate.resolve_startup(Ok(Some(ada.clone())));

        assert!(matches!(transition, GateTransition::SignedIn(ref context) if context.identity == ada));
        assert_eq!(gate.context().map(SessionContext::user_id), Some(ada.user_id));
    }

    #[test]
    fn failed_startup_check_means_unauthenticated() {
        let mut gate = SessionGate::new();
        let transition = gate.resolve_startup(Err(StoreError::Unavailable {
            stage: "test",
            details: "offline".to_string(),
        }));

        assert_eq!(transition, GateTransition::SignedOut);
        assert_eq!(gate.state(), &GateState::Unauthenticated);
    }

    #[test]
    fn late_startup_result_does_not_override_auth_event() {
        let mut gate = SessionGate::new();
        let ada = identity("ada@example.com");
        gate.apply_auth_event(AuthEvent::SignedIn(ada.clone()));

        assert_eq!(gate.resolve_startup(Ok(None)), GateTransition::Unchanged);
        assert_eq!(gate.context().map(|context| &context.identity), Some(&ada));
    }

    #[test]
    fn resync_failure_keeps_the_signed_in_user() {
        let mut gate = SessionGate::new();
        let ada = identity("ada@example.com");
        gate.apply_auth_event(AuthEvent::SignedIn(ada.clone()));
        let epoch = gate.epoch();

        let transition = gate.reconcile(Err(StoreError::Unavailable {
            stage: "test",
            details: "offline".to_string(),
        }));
        assert_eq!(transition, GateTransition::Unchanged);
        assert!(gate.is_current(epoch));

        assert_eq!(gate.reconcile(Ok(None)), GateTransition::SignedOut);
    }

    #[test]
    fn every_identity_change_moves_the_epoch() {
        let mut gate = SessionGate::new();
        let ada = identity("ada@example.com");
        let bob = identity("bob@example.com");

        gate.apply_auth_event(AuthEvent::SignedIn(ada.clone()));
        let after_ada = gate.epoch();
        assert_eq!(
            gate.apply_auth_event(AuthEvent::SignedIn(ada)),
            GateTransition::Unchanged
        );
        assert_eq!(gate.epoch(), after_ada);

        gate.apply_auth_event(AuthEvent::SignedIn(bob));
        let after_bob = gate.epoch();
        assert!(after_bob > after_ada);

        assert_eq!(
            gate.apply_auth_event(AuthEvent::SignedOut),
            GateTransition::SignedOut
        );
        assert!(gate.epoch() > after_bob);
        assert!(!gate.is_current(after_bob));
        assert_eq!(
            gate.apply_auth_event(AuthEvent::SignedOut),
            GateTransition::Unchanged
        );
    }
}
