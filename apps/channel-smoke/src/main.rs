mod logging;

use std::{process, sync::Arc, time::Duration};

use telepathy_client::{Channel, ClientConfig};
use telepathy_core::{ChangeReason, ChannelEvent, ChannelSignal, PropertyMap, TpError};
use telepathy_testing::{
    FakeConnection,
    fixtures::{SELF_HANDLE, legacy_group_channel},
};
use tokio::time::timeout;
use tracing::{error, info};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(2);
        }
    };

    if let Err(err) = run(&config).await {
        error!(error = %err, "smoke run failed");
        eprintln!("Smoke run failed: {err}");
        process::exit(1);
    }
}

async fn run(config: &ClientConfig) -> Result<(), TpError> {
    let fake = FakeConnection::ready(SELF_HANDLE);
    let remote = legacy_group_channel();
    let channel = Channel::with_config(
        Arc::clone(&fake.connection),
        Arc::new(remote.clone()),
        PropertyMap::new(),
        config,
    );
    let mut events = channel.subscribe();

    step(channel.become_ready(&[Channel::FEATURE_CORE])).await?;
    info!(calls = remote.calls().len(), "channel ready");
    print_snapshot(&channel);

    remote.emit(ChannelSignal::MembersChanged {
        message: "welcome".to_owned(),
        added: vec![9],
        removed: Vec::new(),
        local_pending: Vec::new(),
        remote_pending: Vec::new(),
        actor: SELF_HANDLE,
        reason: ChangeReason::Invited,
    });
    if let Ok(Ok(ChannelEvent::GroupMembersChanged { added, details, .. })) =
        timeout(STEP_TIMEOUT, events.recv()).await
    {
        let ids: Vec<&str> = added.iter().map(|c| c.id()).collect();
        println!("members added: {ids:?} (message: {:?})", details.message());
    }

    step(channel.request_close()).await?;
    remote.emit(ChannelSignal::Closed);
    while let Ok(Ok(event)) = timeout(STEP_TIMEOUT, events.recv()).await {
        if let ChannelEvent::Invalidated { error } = event {
            println!("channel invalidated: {error}");
            break;
        }
    }
    print_snapshot(&channel);
    Ok(())
}

async fn step(operation: impl Future<Output = Result<(), TpError>>) -> Result<(), TpError> {
    timeout(STEP_TIMEOUT, operation)
        .await
        .unwrap_or_else(|_| Err(TpError::not_available("operation timed out")))
}

fn print_snapshot(channel: &Channel) {
    match serde_json::to_string_pretty(&channel.snapshot()) {
        Ok(json) => println!("{json}"),
        Err(err) => error!(error = %err, "could not serialize channel snapshot"),
    }
}
