//! CPU mode state machine.

/// The guest's current protection/privilege state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Protection disabled (CR0 bit 0 clear). Boot state.
    ProtectedOff,
    /// Protection enabled, executing in supervisor (ring 0) half.
    SupervisorProtected,
    /// Protection enabled, executing in user (ring 3) half.
    UserProtected,
}

impl Mode {
    /// `true` once CR0 bit 0 has been set, regardless of privilege half.
    #[must_use]
    pub const fn is_protected(self) -> bool {
        !matches!(self, Mode::ProtectedOff)
    }

    /// `true` only in the user half of protected mode — the half that
    /// privileged operations must reject.
    #[must_use]
    pub const fn is_user(self) -> bool {
        matches!(self, Mode::UserProtected)
    }

    /// `true` in the supervisor half of protected mode.
    #[must_use]
    pub const fn is_supervisor(self) -> bool {
        matches!(self, Mode::SupervisorProtected)
    }
}
