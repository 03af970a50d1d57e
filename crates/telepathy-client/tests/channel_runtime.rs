use std::time::Duration;

use telepathy_client::{Channel, ChannelRemote, ClientConfig, EventStream};
use telepathy_core::{
    ChangeReason, ChannelEvent, ChannelLifecycleState, ChannelSignal, ContactPtr, GroupFlags,
    Handle, ObjectPath, PropertyMap, RemoteReply, RemoteRequest, TpError, Variant,
    constants::{CHANNEL_TYPE_TEXT, IFACE_CHANNEL, IFACE_CHANNEL_GROUP, details_keys},
    error::{ErrorKind, names},
};
use telepathy_testing::{
    FakeChannelRemote, FakeConnection, FakeContactResolver,
    fixtures::{
        SELF_HANDLE, conference_channel, detailed_group_channel, get_all, legacy_group_channel,
    },
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn handles(contacts: &[ContactPtr]) -> Vec<Handle> {
    let mut handles: Vec<Handle> = contacts.iter().map(|c| c.handle()).collect();
    handles.sort_unstable();
    handles
}

async fn ready(channel: &Channel) {
    timeout(WAIT, channel.become_ready(&[Channel::FEATURE_CORE]))
        .await
        .expect("readiness should finish in time")
        .expect("channel should become ready");
}

/// Wait until the runtime has issued `method` on `remote`.
async fn wait_for_call(remote: &FakeChannelRemote, method: &str) {
    timeout(WAIT, async {
        while remote.call_count(method) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("call should be issued in time");
}

async fn next_event(events: &mut EventStream) -> ChannelEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event should arrive in time")
        .expect("event stream should stay open")
}

/// Collect events up to and including the invalidation.
async fn events_until_invalidated(events: &mut EventStream) -> Vec<ChannelEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = matches!(event, ChannelEvent::Invalidated { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn members_added(handles: Vec<Handle>) -> ChannelSignal {
    ChannelSignal::MembersChangedDetailed {
        added: handles,
        removed: Vec::new(),
        local_pending: Vec::new(),
        remote_pending: Vec::new(),
        details: PropertyMap::new(),
    }
}

#[tokio::test]
async fn legacy_group_channel_becomes_ready_with_its_members() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = legacy_group_channel();
    let channel = fake.channel(&remote, PropertyMap::new());

    ready(&channel).await;

    assert_eq!(channel.state(), ChannelLifecycleState::Ready);
    assert!(channel.is_ready(&Channel::FEATURE_CORE));
    assert_eq!(channel.channel_type(), CHANNEL_TYPE_TEXT);
    assert_eq!(handles(&channel.group_contacts(true)), vec![3, 7]);
    assert_eq!(
        channel.group_self_contact().map(|c| c.handle()),
        Some(SELF_HANDLE)
    );
    assert_eq!(remote.call_count("GetAll"), 2);
    assert_eq!(remote.call_count("GetGroupFlags"), 1);
    assert_eq!(remote.call_count("GetAllMembers"), 1);
}

#[tokio::test]
async fn detailed_member_addition_is_announced_exactly_once() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = detailed_group_channel(&[3, SELF_HANDLE], GroupFlags::CAN_ADD);
    let channel = fake.channel(&remote, PropertyMap::new());
    ready(&channel).await;

    let mut events = channel.subscribe();
    remote.emit(members_added(vec![9]));

    match next_event(&mut events).await {
        ChannelEvent::GroupMembersChanged {
            added,
            local_pending,
            remote_pending,
            removed,
            ..
        } => {
            assert_eq!(handles(&added), vec![9]);
            assert!(local_pending.is_empty());
            assert!(remote_pending.is_empty());
            assert!(removed.is_empty());
        }
        other => panic!("expected a membership change, got {other:?}"),
    }

    remote.emit(ChannelSignal::Closed);
    let rest = events_until_invalidated(&mut events).await;
    assert!(
        !rest
            .iter()
            .any(|e| matches!(e, ChannelEvent::GroupMembersChanged { .. })),
        "membership change announced twice: {rest:?}"
    );
    assert!(handles(&channel.group_contacts(true)).contains(&9));
}

#[tokio::test]
async fn mandatory_fallback_failure_invalidates_with_the_remote_error() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = FakeChannelRemote::new("/org/freedesktop/Telepathy/Connection/fake/broken")
        .with_reply(
            RemoteRequest::GetChannelType,
            Err(TpError::remote(names::NO_REPLY, "timed out")),
        );
    let channel = fake.channel(&remote, PropertyMap::new());
    let mut events = channel.subscribe();

    let err = timeout(WAIT, channel.become_ready(&[Channel::FEATURE_CORE]))
        .await
        .expect("readiness should finish in time")
        .expect_err("readiness must fail");
    assert_eq!(err.name, names::NO_REPLY);

    assert_eq!(channel.state(), ChannelLifecycleState::Invalidated);
    assert_eq!(
        channel.invalidation().map(|e| e.name),
        Some(names::NO_REPLY.to_owned())
    );
    match events_until_invalidated(&mut events).await.pop() {
        Some(ChannelEvent::Invalidated { error }) => assert_eq!(error, err),
        other => panic!("expected invalidation, got {other:?}"),
    }
}

#[tokio::test]
async fn legacy_main_calls_are_used_when_get_all_is_missing() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = legacy_group_channel()
        .with_reply(
            get_all(IFACE_CHANNEL),
            Err(TpError::remote(names::UNKNOWN_METHOD, "old service")),
        )
        .with_reply(
            RemoteRequest::GetChannelType,
            Ok(RemoteReply::ChannelType(CHANNEL_TYPE_TEXT.to_owned())),
        )
        .with_reply(
            RemoteRequest::GetHandle,
            Ok(RemoteReply::Handle {
                handle_type: telepathy_core::HandleType::Contact,
                handle: SELF_HANDLE,
            }),
        )
        .with_reply(
            RemoteRequest::GetInterfaces,
            Ok(RemoteReply::Interfaces(vec![IFACE_CHANNEL_GROUP.to_owned()])),
        );
    let channel = fake.channel(&remote, PropertyMap::new());
    ready(&channel).await;

    assert_eq!(remote.call_count("GetChannelType"), 1);
    assert_eq!(remote.call_count("GetInterfaces"), 1);
    assert_eq!(channel.interfaces(), vec![IFACE_CHANNEL_GROUP.to_owned()]);
    assert_eq!(remote.call_count("GetHandle"), 1);
    assert_eq!(channel.target_handle_type(), telepathy_core::HandleType::Contact);
    assert_eq!(channel.target_handle(), SELF_HANDLE);
    assert_eq!(handles(&channel.group_contacts(true)), vec![3, 7]);
}

#[tokio::test(start_paused = true)]
async fn slow_resolution_does_not_reorder_membership_changes() {
    let resolver = FakeContactResolver::new().with_delay(20, Duration::from_millis(100));
    let fake = FakeConnection::with_resolver(resolver);
    fake.connection.set_ready(SELF_HANDLE);
    let remote = detailed_group_channel(&[3, SELF_HANDLE], GroupFlags::empty());
    let channel = fake.channel(&remote, PropertyMap::new());
    ready(&channel).await;

    let mut events = channel.subscribe();
    remote.emit(members_added(vec![20]));
    remote.emit(members_added(vec![21]));

    let mut order = Vec::new();
    while order.len() < 2 {
        if let ChannelEvent::GroupMembersChanged { added, .. } = next_event(&mut events).await {
            order.push(handles(&added));
        }
    }
    assert_eq!(order, vec![vec![20], vec![21]]);
}

#[tokio::test]
async fn channel_waits_for_its_connection() {
    let fake = FakeConnection::connecting();
    let remote = legacy_group_channel();
    let channel = fake.channel(&remote, PropertyMap::new());

    let readiness = channel.become_ready(&[Channel::FEATURE_CORE]);
    tokio::task::yield_now().await;
    assert!(remote.calls().is_empty());
    assert_eq!(channel.state(), ChannelLifecycleState::Constructing);

    fake.connection.set_ready(SELF_HANDLE);
    timeout(WAIT, readiness)
        .await
        .expect("readiness should finish in time")
        .expect("channel should become ready");
    assert_eq!(channel.state(), ChannelLifecycleState::Ready);
}

#[tokio::test]
async fn leaving_twice_only_removes_once() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = detailed_group_channel(&[3, SELF_HANDLE], GroupFlags::CAN_REMOVE);
    let channel = fake.channel(&remote, PropertyMap::new());
    ready(&channel).await;

    let first = channel.request_leave("bye", ChangeReason::None);
    wait_for_call(&remote, "RemoveMembersWithReason").await;
    remote.emit(ChannelSignal::MembersChangedDetailed {
        added: Vec::new(),
        removed: vec![SELF_HANDLE],
        local_pending: Vec::new(),
        remote_pending: Vec::new(),
        details: PropertyMap::from([(
            details_keys::ACTOR.to_owned(),
            Variant::U32(SELF_HANDLE),
        )]),
    });
    timeout(WAIT, first)
        .await
        .expect("leave should finish in time")
        .expect("leave should succeed");

    timeout(WAIT, channel.request_leave("", ChangeReason::None))
        .await
        .expect("second leave should finish in time")
        .expect("second leave should succeed");
    assert_eq!(remote.call_count("RemoveMembersWithReason"), 1);
    assert!(channel.group_self_contact_remove_info().is_some());
}

#[tokio::test]
async fn connection_loss_orphans_the_channel() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = legacy_group_channel().with_delay("GetAll", Duration::from_secs(60));
    let channel = fake.channel(&remote, PropertyMap::new());
    let mut events = channel.subscribe();

    let readiness = channel.become_ready(&[Channel::FEATURE_CORE]);
    wait_for_call(&remote, "GetAll").await;
    fake.connection
        .invalidate(TpError::remote(names::CANCELLED, "disconnected"));

    let err = timeout(WAIT, readiness)
        .await
        .expect("readiness should finish in time")
        .expect_err("connection is gone");
    assert_eq!(err.name, names::ORPHANED);
    match events_until_invalidated(&mut events).await.pop() {
        Some(ChannelEvent::Invalidated { error }) => assert_eq!(error.name, names::ORPHANED),
        other => panic!("expected invalidation, got {other:?}"),
    }

    // Closing a dead channel succeeds without talking to it.
    timeout(WAIT, channel.request_close())
        .await
        .expect("close should finish in time")
        .expect("close should succeed");
    assert_eq!(remote.call_count("Close"), 0);
}

#[tokio::test]
async fn channel_on_an_invalid_connection_is_stillborn() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    fake.connection
        .invalidate(TpError::remote(names::CANCELLED, "gone already"));
    let channel = fake.channel(&legacy_group_channel(), PropertyMap::new());

    let err = timeout(WAIT, channel.become_ready(&[Channel::FEATURE_CORE]))
        .await
        .expect("readiness should finish in time")
        .expect_err("owner is invalid");
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(!channel.is_valid());
}

#[tokio::test]
async fn conference_merge_creates_a_proxy_for_the_new_channel() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let member = legacy_group_channel();
    fake.factory.register(member.clone());
    let remote = conference_channel(&[]);
    let conference = fake.channel(&remote, PropertyMap::new());
    ready(&conference).await;
    assert!(conference.supports_conference_merging());
    assert!(!conference.supports_conference_splitting());

    let member_channel = fake.channel(&member, PropertyMap::new());
    let mut events = conference.subscribe();
    timeout(WAIT, conference.conference_merge_channel(&member_channel))
        .await
        .expect("merge should finish in time")
        .expect("merge should succeed");
    assert_eq!(
        remote.calls().last(),
        Some(&RemoteRequest::Merge {
            channel: member.object_path().clone(),
        })
    );

    remote.emit(ChannelSignal::ConferenceChannelMerged {
        channel: member.object_path().clone(),
        channel_specific_handle: 0,
        properties: PropertyMap::new(),
    });
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::ConferenceChannelMerged {
            channel: member.object_path().clone(),
        }
    );
    assert_eq!(conference.conference_channels(), vec![member.object_path().clone()]);
    let proxy = conference
        .conference_channel_proxy(member.object_path())
        .expect("proxy created through the factory");
    assert_eq!(proxy.object_path(), member_channel.object_path());

    let err = timeout(WAIT, conference.conference_split_channel())
        .await
        .expect("split should finish in time")
        .expect_err("conference is not splittable");
    assert_eq!(err.kind, ErrorKind::NotImplemented);
}

#[tokio::test]
async fn closed_conference_refuses_merges_with_its_invalidation_error() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let member = legacy_group_channel();
    let remote = conference_channel(&[]);
    let conference = fake.channel(&remote, PropertyMap::new());
    ready(&conference).await;
    let mut events = conference.subscribe();

    remote.emit(ChannelSignal::Closed);
    events_until_invalidated(&mut events).await;

    let member_channel = fake.channel(&member, PropertyMap::new());
    let err = timeout(WAIT, conference.conference_merge_channel(&member_channel))
        .await
        .expect("merge should finish in time")
        .expect_err("channel is closed");
    assert_eq!(err.name, names::CANCELLED);
    assert_eq!(remote.call_count("Merge"), 0);
}

#[tokio::test]
async fn unregistered_conference_members_are_skipped() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let missing = ObjectPath::new("/org/freedesktop/Telepathy/Connection/fake/missing");
    let remote = conference_channel(std::slice::from_ref(&missing));
    let conference = fake.channel(&remote, PropertyMap::new());
    ready(&conference).await;

    assert_eq!(conference.conference_channels(), vec![missing.clone()]);
    assert!(conference.conference_channel_proxy(&missing).is_none());
}

#[tokio::test]
async fn configuration_controls_the_fake_group() {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = FakeChannelRemote::new("/org/freedesktop/Telepathy/Connection/fake/im")
        .with_reply(
            get_all(IFACE_CHANNEL),
            Ok(RemoteReply::Properties(
                telepathy_testing::fixtures::main_properties(
                    &[],
                    telepathy_core::HandleType::Contact,
                    12,
                ),
            )),
        );

    let with_fake_group = fake.channel(&remote, PropertyMap::new());
    ready(&with_fake_group).await;
    assert_eq!(
        handles(&with_fake_group.group_contacts(true)),
        vec![SELF_HANDLE, 12]
    );

    let config = ClientConfig {
        fake_group: false,
        ..ClientConfig::default()
    };
    let without = Channel::with_config(
        fake.connection.clone(),
        std::sync::Arc::new(remote.clone()),
        PropertyMap::new(),
        &config,
    );
    ready(&without).await;
    assert!(without.group_contacts(true).is_empty());
}
