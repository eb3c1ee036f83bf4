//! Telnet option codes and the local negotiation preference table

use std::collections::HashSet;

use crate::error::{BridgeError, Result};

/// Telnet option code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TelnetOption(pub u8);

impl TelnetOption {
    pub const BINARY: Self = Self(0);
    pub const ECHO: Self = Self(1);
    pub const SGA: Self = Self(3);
    pub const TTYPE: Self = Self(24);
    pub const NAWS: Self = Self(31);
    pub const LINEMODE: Self = Self(34);
    pub const MSSP: Self = Self(70);
    pub const COMPRESS2: Self = Self(86);
    pub const ZMP: Self = Self(93);

    #[inline]
    pub fn code(self) -> u8 {
        self.0
    }
}

/// Whether we agree to perform an option ourselves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStance {
    Will,
    Wont,
}

/// Whether we agree to let the remote perform an option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStance {
    Do,
    Dont,
}

/// One row of the preference table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionPreference {
    pub option: TelnetOption,
    pub local: LocalStance,
    pub remote: RemoteStance,
}

impl OptionPreference {
    pub const fn new(option: TelnetOption, local: LocalStance, remote: RemoteStance) -> Self {
        Self { option, local, remote }
    }
}

/// Ordered, immutable option preference table shared by every session
///
/// Options absent from the table are refused in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationPreferences {
    entries: Vec<OptionPreference>,
}

impl NegotiationPreferences {
    /// Build a table, rejecting duplicate option codes
    pub fn new(entries: Vec<OptionPreference>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.option) {
                return Err(BridgeError::Negotiation(format!(
                    "duplicate entry for option {}",
                    entry.option.code()
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Table that refuses every option
    pub fn refuse_all() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn entries(&self) -> &[OptionPreference] {
        &self.entries
    }

    fn find(&self, option: TelnetOption) -> Option<&OptionPreference> {
        self.entries.iter().find(|e| e.option == option)
    }

    /// Our answer when the remote sends DO
    pub fn local(&self, option: TelnetOption) -> LocalStance {
        self.find(option).map_or(LocalStance::Wont, |e| e.local)
    }

    /// Our answer when the remote sends WILL
    pub fn remote(&self, option: TelnetOption) -> RemoteStance {
        self.find(option).map_or(RemoteStance::Dont, |e| e.remote)
    }
}

impl Default for NegotiationPreferences {
    /// Console defaults: binary both ways, let the client echo and report
    /// its terminal, never take over line editing ourselves
    fn default() -> Self {
        use LocalStance::*;
        use RemoteStance::*;

        Self {
            entries: vec![
                OptionPreference::new(TelnetOption::ECHO, Wont, Do),
                OptionPreference::new(TelnetOption::TTYPE, Will, Dont),
                OptionPreference::new(TelnetOption::COMPRESS2, Wont, Do),
                OptionPreference::new(TelnetOption::ZMP, Wont, Do),
                OptionPreference::new(TelnetOption::MSSP, Wont, Do),
                OptionPreference::new(TelnetOption::BINARY, Will, Do),
                OptionPreference::new(TelnetOption::NAWS, Will, Dont),
                OptionPreference::new(TelnetOption::LINEMODE, Wont, Do),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_lookup() {
        let prefs = NegotiationPreferences::default();
        assert_eq!(prefs.entries().len(), 8);
        assert_eq!(prefs.local(TelnetOption::BINARY), LocalStance::Will);
        assert_eq!(prefs.remote(TelnetOption::BINARY), RemoteStance::Do);
        assert_eq!(prefs.local(TelnetOption::ECHO), LocalStance::Wont);
        assert_eq!(prefs.remote(TelnetOption::NAWS), RemoteStance::Dont);
    }

    #[test]
    fn test_unknown_option_refused() {
        let prefs = NegotiationPreferences::default();
        assert_eq!(prefs.local(TelnetOption::SGA), LocalStance::Wont);
        assert_eq!(prefs.remote(TelnetOption::SGA), RemoteStance::Dont);
    }

    #[test]
    fn test_duplicate_option_rejected() {
        let result = NegotiationPreferences::new(vec![
            OptionPreference::new(TelnetOption::ECHO, LocalStance::Will, RemoteStance::Dont),
            OptionPreference::new(TelnetOption::ECHO, LocalStance::Wont, RemoteStance::Do),
        ]);
        assert!(matches!(result, Err(BridgeError::Negotiation(_))));
    }
}
