//! Route to role-set table consulted by the authorization layer.
//!
//! Every route is either on the explicit exempt list or carries the set of
//! roles allowed through. A request matching neither is refused.

use crate::models::Role;
use actix_web::http::Method;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSet(u8);

const fn bit(role: Role) -> u8 {
    match role {
        Role::Admin => 0b001,
        Role::Doctor => 0b010,
        Role::Patient => 0b100,
    }
}

impl RoleSet {
    pub const ADMIN_ONLY: RoleSet = RoleSet(bit(Role::Admin));
    pub const ADMIN_AND_PATIENT: RoleSet = RoleSet(bit(Role::Admin) | bit(Role::Patient));
    pub const ADMIN_AND_DOCTOR: RoleSet = RoleSet(bit(Role::Admin) | bit(Role::Doctor));
    pub const ALL_ROLES: RoleSet = RoleSet(bit(Role::Admin) | bit(Role::Doctor) | bit(Role::Patient));

    pub fn of(roles: &[Role]) -> Self {
        RoleSet(roles.iter().fold(0, |acc, role| acc | bit(*role)))
    }

    pub fn allows(self, role: Role) -> bool {
        self.0 & bit(role) != 0
    }

    pub fn roles(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |role| self.allows(*role))
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.roles().map(|role| role.as_str()).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

/// `/api/patients/{id}` style pattern. A `{..}` segment matches any one
/// non-empty path segment.
#[derive(Debug, Clone)]
struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|segment| {
                if segment.starts_with('{') && segment.ends_with('}') {
                    Segment::Param
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    fn matches(&self, path: &str) -> bool {
        let mut parts = split_path(path);
        for segment in &self.segments {
            let Some(part) = parts.next() else {
                return false;
            };
            let ok = match segment {
                Segment::Literal(literal) => literal == part,
                Segment::Param => !part.is_empty(),
            };
            if !ok {
                return false;
            }
        }
        parts.next().is_none()
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Literal(_)))
            .count()
    }
}

fn split_path(path: &str) -> std::str::Split<'_, char> {
    let trimmed = path.trim_end_matches('/');
    trimmed.strip_prefix('/').unwrap_or(trimmed).split('/')
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Exempt,
    Roles(RoleSet),
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    pattern: PathPattern,
    access: Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// On the allow-list: no token, revocation or role checks.
    Exempt,
    Protected(RoleSet),
    /// No rule covers the route; callers must deny.
    Unmapped,
}

/// Built once at startup and handed to the authorizer, so tests can swap in
/// their own table.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    routes: Vec<Route>,
}

impl RoutePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exempt(mut self, method: Method, path: &str) -> Self {
        self.routes.push(Route {
            method,
            pattern: PathPattern::parse(path),
            access: Access::Exempt,
        });
        self
    }

    pub fn rule(mut self, method: Method, path: &str, roles: RoleSet) -> Self {
        self.routes.push(Route {
            method,
            pattern: PathPattern::parse(path),
            access: Access::Roles(roles),
        });
        self
    }

    /// The matching route with the most literal segments wins, so
    /// `/api/users/blacklist` beats `/api/users/{id}`.
    pub fn decide(&self, method: &Method, path: &str) -> PolicyDecision {
        let best = self
            .routes
            .iter()
            .filter(|route| route.method == *method && route.pattern.matches(path))
            .max_by_key(|route| route.pattern.literal_count());

        match best.map(|route| route.access) {
            Some(Access::Exempt) => PolicyDecision::Exempt,
            Some(Access::Roles(roles)) => PolicyDecision::Protected(roles),
            None => PolicyDecision::Unmapped,
        }
    }

    /// Routes served by the identity service binary.
    pub fn idm() -> Self {
        Self::new()
            .exempt(Method::POST, "/idm/register")
            .exempt(Method::POST, "/idm/login")
            .exempt(Method::GET, "/health")
            .exempt(Method::GET, "/metrics")
            .exempt(Method::GET, "/internal/blacklist/{user_id}")
            .rule(Method::POST, "/idm/logout", RoleSet::ALL_ROLES)
            .rule(Method::GET, "/idm/me", RoleSet::ALL_ROLES)
            .rule(Method::PUT, "/idm/user/{user_id}/password", RoleSet::ALL_ROLES)
            .rule(Method::PUT, "/idm/user/{user_id}/role", RoleSet::ADMIN_ONLY)
            .rule(Method::POST, "/idm/blacklist", RoleSet::ADMIN_ONLY)
            .rule(Method::GET, "/idm/blacklist/{user_id}", RoleSet::ADMIN_ONLY)
            .rule(Method::DELETE, "/idm/blacklist/{user_id}", RoleSet::ADMIN_ONLY)
    }

    /// Public routes of the clinic API gateway.
    pub fn clinic_gateway() -> Self {
        use RoleSet as R;

        let mut policy = Self::new()
            .exempt(Method::POST, "/api/register")
            .exempt(Method::POST, "/api/login")
            .exempt(Method::GET, "/api/health-check")
            .exempt(Method::GET, "/metrics");
        for service in ["idm", "patients", "doctors", "appointments", "consultations"] {
            policy = policy.exempt(Method::GET, &format!("/{}/health-check", service));
        }

        policy
            // users
            .rule(Method::GET, "/api/users", R::ADMIN_ONLY)
            .rule(Method::GET, "/api/users/{id}", R::ADMIN_ONLY)
            .rule(Method::PUT, "/api/users/{id}", R::ALL_ROLES)
            .rule(Method::DELETE, "/api/users/{id}", R::ADMIN_ONLY)
            .rule(Method::POST, "/api/users/{id}/password", R::ALL_ROLES)
            .rule(Method::POST, "/api/users/{id}/role", R::ADMIN_ONLY)
            .rule(Method::POST, "/api/users/blacklist", R::ADMIN_ONLY)
            .rule(Method::GET, "/api/users/blacklist/{id}", R::ADMIN_ONLY)
            .rule(Method::DELETE, "/api/users/blacklist/{id}", R::ADMIN_ONLY)
            // patients
            .rule(Method::POST, "/api/patients", R::ADMIN_ONLY)
            .rule(Method::GET, "/api/patients", R::ALL_ROLES)
            .rule(Method::GET, "/api/patients/{id}", R::ALL_ROLES)
            .rule(Method::GET, "/api/patients/email/{email}", R::ALL_ROLES)
            .rule(Method::GET, "/api/patients/users/{id}", R::ALL_ROLES)
            .rule(Method::PUT, "/api/patients/{id}", R::ADMIN_AND_PATIENT)
            .rule(Method::DELETE, "/api/patients/{id}", R::ADMIN_ONLY)
            // doctors
            .rule(Method::POST, "/api/doctors", R::ADMIN_ONLY)
            .rule(Method::GET, "/api/doctors", R::ALL_ROLES)
            .rule(Method::GET, "/api/doctors/{id}", R::ALL_ROLES)
            .rule(Method::GET, "/api/doctors/email/{email}", R::ALL_ROLES)
            .rule(Method::GET, "/api/doctors/users/{id}", R::ALL_ROLES)
            .rule(Method::PATCH, "/api/doctors/users/{id}/activity", R::ADMIN_ONLY)
            .rule(Method::PUT, "/api/doctors/{id}", R::ADMIN_AND_DOCTOR)
            .rule(Method::DELETE, "/api/doctors/{id}", R::ADMIN_AND_DOCTOR)
            // appointments
            .rule(Method::POST, "/api/appointments", R::ADMIN_AND_DOCTOR)
            .rule(Method::GET, "/api/appointments", R::ALL_ROLES)
            .rule(Method::GET, "/api/appointments/{id}", R::ALL_ROLES)
            .rule(Method::PUT, "/api/appointments/{id}", R::ADMIN_AND_DOCTOR)
            .rule(Method::DELETE, "/api/appointments/{id}", R::ADMIN_AND_DOCTOR)
            // consultations
            .rule(Method::POST, "/api/consultations", R::ADMIN_AND_DOCTOR)
            .rule(Method::GET, "/api/consultations", R::ALL_ROLES)
            .rule(Method::GET, "/api/consultations/{id}", R::ALL_ROLES)
            .rule(Method::GET, "/api/consultations/doctor/{id}", R::ALL_ROLES)
            .rule(Method::GET, "/api/consultations/patient/{id}", R::ALL_ROLES)
            .rule(Method::GET, "/api/consultations/date/{date}", R::ALL_ROLES)
            .rule(Method::PUT, "/api/consultations/{id}", R::ADMIN_AND_DOCTOR)
            .rule(Method::DELETE, "/api/consultations/{id}", R::ADMIN_AND_DOCTOR)
    }
}
