//! The closed set of DHCP client states.

use enum_iterator::Sequence;

#[derive(Copy, Debug, Sequence, PartialEq, Eq, Hash, Clone)]
pub enum DhcpState {
    Preinit,
    Bound,
    Renew,
    Rebind,
    Reboot,
    Release,
    Expire,
    Fail,
    Timeout,
    /// Helper died abnormally.
    Abend,
    /// Helper exited cleanly.
    End,
}

impl DhcpState {
    /// Terminal states for the purposes of the Manager: the client is
    /// removed from the registry on entry.
    pub fn is_terminal(self) -> bool {
        matches!(self, DhcpState::Abend | DhcpState::End)
    }

    /// States on entry to which a fresh `Ip4Config` is (re)built from the
    /// event's options.
    pub fn is_lease_bearing(self) -> bool {
        matches!(
            self,
            DhcpState::Bound | DhcpState::Renew | DhcpState::Rebind | DhcpState::Reboot
        )
    }

    /// Maps a `reason` token from a DHCP event to a state. Shared by both
    /// back-ends: dhclient and dhcpcd use compatible tokens. Unknown
    /// reasons return `None`; callers log and no-op.
    pub fn from_reason(reason: &str) -> Option<Self> {
        Some(match reason {
            "PREINIT" => DhcpState::Preinit,
            "BOUND" => DhcpState::Bound,
            "RENEW" => DhcpState::Renew,
            "REBIND" => DhcpState::Rebind,
            "REBOOT" => DhcpState::Reboot,
            "EXPIRE" => DhcpState::Expire,
            "FAIL" => DhcpState::Fail,
            "RELEASE" => DhcpState::Release,
            "STOP" => DhcpState::End,
            _ => return None,
        })
    }
}
