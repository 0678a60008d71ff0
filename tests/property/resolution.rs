//! Property-based tests for the permission resolution engine.
//!
//! Uses proptest to verify:
//! 1. The owner is allowed at every level, in every mode, whatever grants exist.
//! 2. A caller holding only a grant at level L is allowed a required level R
//!    iff `level(L) >= level(R)`.
//! 3. Strict task resolution denies a caller holding only a task grant.
//! 4. Effective access agrees with lenient resolution.

use proptest::prelude::*;
use taskshare_proto::access::{
    CallerGrants, Mode, Permission, resolve_list, resolve_task, task_access,
};
use taskshare_proto::ids::UserId;

/// Strategy for generating arbitrary permission levels.
fn arb_permission() -> impl Strategy<Value = Permission> {
    prop_oneof![
        Just(Permission::View),
        Just(Permission::Edit),
        Just(Permission::Admin),
    ]
}

/// Strategy for generating an optional grant.
fn arb_grant() -> impl Strategy<Value = Option<Permission>> {
    prop::option::of(arb_permission())
}

/// Strategy for generating arbitrary caller grants.
fn arb_grants() -> impl Strategy<Value = CallerGrants> {
    (arb_grant(), arb_grant()).prop_map(|(list, task)| CallerGrants { list, task })
}

/// Strategy for generating a resolution mode.
fn arb_mode() -> impl Strategy<Value = Mode> {
    prop_oneof![Just(Mode::Lenient), Just(Mode::Strict)]
}

/// Strategy for generating user ids.
fn arb_user() -> impl Strategy<Value = UserId> {
    "[a-z]{1,8}".prop_map(UserId::new)
}

proptest! {
    #[test]
    fn owner_always_allowed(
        owner in arb_user(),
        grants in arb_grants(),
        required in arb_permission(),
        mode in arb_mode(),
    ) {
        prop_assert!(resolve_list(&owner, &owner, grants.list, required).is_allowed());
        prop_assert!(resolve_task(&owner, &owner, grants, required, mode).is_allowed());
    }

    #[test]
    fn single_list_grant_allows_iff_level_suffices(
        have in arb_permission(),
        required in arb_permission(),
        mode in arb_mode(),
    ) {
        let caller = UserId::new("grantee");
        let owner = UserId::new("owner");
        let expected = have.level() >= required.level();
        prop_assert_eq!(resolve_list(&caller, &owner, Some(have), required).is_allowed(), expected);
        prop_assert_eq!(
            resolve_task(&caller, &owner, CallerGrants::list(have), required, mode).is_allowed(),
            expected
        );
    }

    #[test]
    fn single_task_grant_lenient_allows_iff_level_suffices(
        have in arb_permission(),
        required in arb_permission(),
    ) {
        let caller = UserId::new("grantee");
        let owner = UserId::new("owner");
        let decision = resolve_task(
            &caller,
            &owner,
            CallerGrants::task(have),
            required,
            Mode::Lenient,
        );
        prop_assert_eq!(decision.is_allowed(), have.level() >= required.level());
    }

    #[test]
    fn strict_denies_task_only_grant(
        have in arb_permission(),
        required in arb_permission(),
    ) {
        let caller = UserId::new("grantee");
        let owner = UserId::new("owner");
        let decision = resolve_task(
            &caller,
            &owner,
            CallerGrants::task(have),
            required,
            Mode::Strict,
        );
        prop_assert!(!decision.is_allowed());
    }

    #[test]
    fn no_grant_never_allowed(required in arb_permission(), mode in arb_mode()) {
        let caller = UserId::new("stranger");
        let owner = UserId::new("owner");
        prop_assert!(!resolve_list(&caller, &owner, None, required).is_allowed());
        prop_assert!(!resolve_task(&caller, &owner, CallerGrants::NONE, required, mode).is_allowed());
    }

    #[test]
    fn strict_never_allows_more_than_lenient(
        grants in arb_grants(),
        required in arb_permission(),
    ) {
        let caller = UserId::new("grantee");
        let owner = UserId::new("owner");
        let strict = resolve_task(&caller, &owner, grants, required, Mode::Strict);
        let lenient = resolve_task(&caller, &owner, grants, required, Mode::Lenient);
        prop_assert!(!strict.is_allowed() || lenient.is_allowed());
    }

    #[test]
    fn effective_access_matches_lenient_resolution(
        caller in arb_user(),
        grants in arb_grants(),
        required in arb_permission(),
    ) {
        let owner = UserId::new("owner");
        let lenient = resolve_task(&caller, &owner, grants, required, Mode::Lenient);
        let projected = task_access(&caller, &owner, grants)
            .is_some_and(|access| access.satisfies(required));
        prop_assert_eq!(lenient.is_allowed(), projected);
    }
}
