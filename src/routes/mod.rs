/// Router Module Index
///
/// Organizes the routing surface into access-segregated modules so the
/// authentication and role boundaries are applied at the router layer, not
/// rediscovered handler by handler.

/// Routes accessible without a session (health, register, login).
pub mod public;

/// Routes protected by the `AuthUser` extractor middleware. All domain
/// CRUD lives here; per-entity authorization happens in the policy engine.
pub mod authenticated;

/// Routes restricted to the superuser role (user administration).
pub mod admin;
