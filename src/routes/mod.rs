/// Router Module Index
///
/// Organizes the application's routing logic into policy-segregated modules.
/// The split mirrors the policy table: the guard middleware decides access per
/// path prefix, and these modules keep each prefix's handlers together so the
/// mapping from policy entry to code is one hop.

/// Routes under public prefixes: health probe and the auth gateway.
pub mod public;

/// Routes under `/api/user`: profile and session self-management.
/// The policy table admits any of admin/user/member here.
pub mod user;

/// Routes under `/api/admin`: user administration, admin role only.
pub mod admin;
