use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "parent" => Some(Role::Parent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
        }
    }
}

/// The signed-in identity a page reads at mount time. Populated by
/// session.login, cleared by session.logout, read-only in between.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub role: Role,
    pub profile_id: String,
    pub display_name: String,
}

impl SessionContext {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "role": self.role.as_str(),
            "profileId": self.profile_id,
            "displayName": self.display_name,
        })
    }
}

/// Which slice of the records a session may fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    TeacherOf(String),
    ParentOf(String),
    StudentSelf(String),
}

pub fn scope_of(session: Option<&SessionContext>) -> Scope {
    match session {
        Some(s) => match s.role {
            Role::Admin => Scope::All,
            Role::Teacher => Scope::TeacherOf(s.profile_id.clone()),
            Role::Parent => Scope::ParentOf(s.profile_id.clone()),
            Role::Student => Scope::StudentSelf(s.profile_id.clone()),
        },
        None => Scope::All,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("Admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" TEACHER "), Some(Role::Teacher));
        assert_eq!(Role::parse("principal"), None);
    }

    #[test]
    fn missing_session_scopes_to_all() {
        assert_eq!(scope_of(None), Scope::All);
        let s = SessionContext {
            role: Role::Teacher,
            profile_id: "t1".into(),
            display_name: "T".into(),
        };
        assert_eq!(scope_of(Some(&s)), Scope::TeacherOf("t1".into()));
    }
}
