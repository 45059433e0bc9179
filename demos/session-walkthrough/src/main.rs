//! Two devices of one user, sharing an in-memory backend.
//!
//! Run with `RUST_LOG=debug` to see what each layer does.

use std::sync::Arc;

use mentora::prelude::*;
use tracing_subscriber::EnvFilter;

type Client =
    SessionClient<MemoryStore, MemoryIdentityProvider, StaticPlatform, MemoryLocalStorage>;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

struct Phone {
    name: &'static str,
    identity: Arc<MemoryIdentityProvider>,
    client: Client,
}

impl Phone {
    fn new(store: &Arc<MemoryStore>, name: &'static str, model: &str) -> Self {
        let identity = Arc::new(MemoryIdentityProvider::new());
        let platform = StaticPlatform::new("android", "2.3.0")
            .with_unique_id(name)
            .with_hardware("Pixel", model, "14");
        let client = SessionClient::builder()
            .token_config(TokenConfig::from_env())
            .build(
                Arc::clone(store),
                Arc::clone(&identity),
                Arc::new(platform),
                Arc::new(MemoryLocalStorage::new()),
            );
        Self {
            name,
            identity,
            client,
        }
    }
}

fn backend() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    if let serde_json::Value::Object(profile) = serde_json::json!({
        "role": "mentor",
        "displayName": "Ada",
    }) {
        store.insert("users", "ada", profile);
    }
    store
}

async fn print_sessions(phone: &Phone) -> Result<(), MentoraError> {
    for session in phone.client.get_user_sessions().await? {
        println!(
            "  [{}] {} {} active={}",
            phone.name, session.id, session.device_info.model, session.is_active
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Walkthrough
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), MentoraError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = backend();
    let phone = Phone::new(&store, "phone", "8");
    let tablet = Phone::new(&store, "tablet", "Tablet");

    let mut phone_events = phone.client.events();
    let listener = phone.client.watch_auth_state();
    let heartbeat = phone.client.start_heartbeat();

    println!("1. Ada signs in on her phone");
    phone.identity.sign_in(AuthUser::new("ada", Some("ada@example.com")));
    println!("   event: {:?}", phone_events.recv().await);

    println!("2. ...and on her tablet");
    tablet.identity.sign_in(AuthUser::new("ada", Some("ada@example.com")));
    tablet.client.on_signed_in().await?;
    print_sessions(&phone).await?;

    println!("3. Phone makes an authenticated call");
    let token = phone.client.get_valid_access_token().await?;
    println!("   access token: {}...", &token[..token.len().min(24)]);

    println!("4. Phone goes to the background");
    heartbeat.transition(AppLifecycle::Background).await?;

    println!("5. Tablet logs out everywhere");
    let revoked = tablet.client.logout_all_devices().await?;
    println!("   revoked {revoked} session(s)");

    println!("6. Phone comes back to the foreground");
    heartbeat.transition(AppLifecycle::Active).await?;
    println!("   event: {:?}", phone_events.recv().await);
    println!(
        "   phone signed in: {}",
        phone.identity.current_user().is_some()
    );

    heartbeat.shutdown().await?;
    listener.stop();
    Ok(())
}
