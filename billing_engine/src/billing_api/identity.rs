use serde::{Deserialize, Serialize};

pub const ADMIN_ROLE: &str = "admin";

/// The authenticated identity behind a request. How it was established is up to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: i64,
    pub email: String,
    pub roles: Vec<String>,
}

impl Caller {
    pub fn new<S: Into<String>>(user_id: i64, email: S) -> Self {
        Self { user_id, email: email.into(), roles: Vec::new() }
    }

    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.trim().eq_ignore_ascii_case(role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roles_are_case_insensitive() {
        let caller = Caller::new(7, "a@b.test").with_role("Admin");
        assert!(caller.is_admin());
        assert!(caller.has_role("ADMIN"));
        assert!(!Caller::new(7, "a@b.test").with_role("user").is_admin());
    }
}
