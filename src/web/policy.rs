use std::fmt;

use serde::{Deserialize, Serialize};

/// Account tier stored in `users.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Applicant,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Applicant => "applicant",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applicant" => Some(Role::Applicant),
            "admin" => Some(Role::Admin),
            "superadmin" => Some(Role::Superadmin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role `{}`", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Role::parse(&value).ok_or(UnknownRole(value))
    }
}

/// Capabilities checked by handlers. Ownership checks (own application,
/// own files) happen next to the data; everything role-based goes here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ListApplications,
    ReadAnyApplication,
    TransitionApplication,
    ManagePeriods,
    ExportApplications,
    ReadAnyFile,
    ListAccounts,
    ListSuperadmins,
    CreateAccount(Role),
    DeleteAccount,
}

pub fn is_allowed(role: Role, action: Action) -> bool {
    match (role, action) {
        (Role::Superadmin, _) => true,
        (Role::Admin, Action::CreateAccount(target)) => target == Role::Admin,
        (Role::Admin, Action::DeleteAccount | Action::ListSuperadmins) => false,
        (Role::Admin, _) => true,
        (Role::Applicant, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applicants_hold_no_staff_capabilities() {
        for action in [
            Action::ListApplications,
            Action::ReadAnyApplication,
            Action::TransitionApplication,
            Action::ManagePeriods,
            Action::ExportApplications,
            Action::ReadAnyFile,
            Action::ListAccounts,
            Action::CreateAccount(Role::Admin),
            Action::DeleteAccount,
        ] {
            assert!(!is_allowed(Role::Applicant, action), "{action:?}");
        }
    }

    #[test]
    fn admins_create_admins_but_never_delete() {
        assert!(is_allowed(Role::Admin, Action::CreateAccount(Role::Admin)));
        assert!(!is_allowed(
            Role::Admin,
            Action::CreateAccount(Role::Superadmin)
        ));
        assert!(!is_allowed(
            Role::Admin,
            Action::CreateAccount(Role::Applicant)
        ));
        assert!(!is_allowed(Role::Admin, Action::DeleteAccount));
        assert!(!is_allowed(Role::Admin, Action::ListSuperadmins));
        assert!(is_allowed(Role::Admin, Action::ManagePeriods));
        assert!(is_allowed(Role::Admin, Action::ExportApplications));
    }

    #[test]
    fn superadmins_hold_every_capability() {
        assert!(is_allowed(Role::Superadmin, Action::DeleteAccount));
        assert!(is_allowed(
            Role::Superadmin,
            Action::CreateAccount(Role::Superadmin)
        ));
        assert!(is_allowed(
            Role::Superadmin,
            Action::CreateAccount(Role::Applicant)
        ));
    }

    #[test]
    fn role_strings_parse_back() {
        assert_eq!(Role::try_from("admin".to_string()).ok(), Some(Role::Admin));
        assert!(Role::try_from("root".to_string()).is_err());
    }
}
