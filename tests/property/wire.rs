//! Property-based tests for the hub wire codec.
//!
//! Uses proptest to verify:
//! 1. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 2. Requests carrying arbitrary patches survive encode → decode.

use proptest::prelude::*;
use taskshare_proto::access::Permission;
use taskshare_proto::ids::{ListId, TaskId, Timestamp, UserId};
use taskshare_proto::model::{Priority, TaskPatch, TaskStatus};
use taskshare_proto::wire::{self, HubMessage, Operation};
use uuid::Uuid;

/// Strategy for generating arbitrary `TaskId` values.
fn arb_task_id() -> impl Strategy<Value = TaskId> {
    any::<u128>().prop_map(|n| TaskId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating arbitrary `ListId` values.
fn arb_list_id() -> impl Strategy<Value = ListId> {
    any::<u128>().prop_map(|n| ListId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating optional task statuses.
fn arb_status() -> impl Strategy<Value = Option<TaskStatus>> {
    prop::option::of(prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Completed),
    ])
}

/// Strategy for generating optional priorities.
fn arb_priority() -> impl Strategy<Value = Option<Priority>> {
    prop::option::of(prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Urgent),
    ])
}

/// Strategy for generating arbitrary task patches, including clears.
fn arb_task_patch() -> impl Strategy<Value = TaskPatch> {
    (
        prop::option::of(".{0,64}"),
        prop::option::of(prop::option::of(".{0,128}")),
        arb_status(),
        arb_priority(),
        prop::option::of(prop::option::of(any::<u64>().prop_map(Timestamp::from_millis))),
        prop::option::of(any::<bool>()),
    )
        .prop_map(
            |(name, description, status, priority, due_date, favorite)| TaskPatch {
                name,
                description,
                status,
                priority,
                due_date,
                favorite,
            },
        )
}

proptest! {
    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = wire::decode(&bytes);
    }

    #[test]
    fn update_task_request_round_trip(
        request_id in any::<u64>(),
        task_id in arb_task_id(),
        patch in arb_task_patch(),
    ) {
        let msg = HubMessage::Request {
            request_id,
            op: Operation::UpdateTask { task_id, patch },
        };
        let bytes = wire::encode(&msg).unwrap();
        prop_assert_eq!(wire::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn subscribe_round_trip(
        request_id in any::<u64>(),
        ids in prop::collection::vec(arb_list_id(), 0..32),
    ) {
        let msg = HubMessage::SubscribeLists { request_id, list_ids: ids };
        let bytes = wire::encode(&msg).unwrap();
        prop_assert_eq!(wire::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn share_request_round_trip(
        list_id in arb_list_id(),
        user in "[a-z0-9-]{1,32}",
        permission in prop::option::of(prop_oneof![
            Just(Permission::View),
            Just(Permission::Edit),
            Just(Permission::Admin),
        ]),
    ) {
        let msg = HubMessage::Request {
            request_id: 1,
            op: Operation::ShareList { list_id, user_id: UserId::new(user), permission },
        };
        let bytes = wire::encode(&msg).unwrap();
        prop_assert_eq!(wire::decode(&bytes).unwrap(), msg);
    }
}
