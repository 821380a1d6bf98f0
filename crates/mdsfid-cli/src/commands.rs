use std::sync::Arc;

use anyhow::{Context, Result};
use mdsfid_auth::{AuthFlow, IdentityServiceClient, InMemoryStateStore, MdsfidConfig};
use serde_json::{Value, json};

use crate::cli::{CreateIdentityArgs, RedirectArgs, ResolveIdentityArgs};
use crate::output::{print_error, print_field, print_success, print_value};

/// Builds the flow with a process-local state store; the CLI never sees the
/// callback, so the stored state only lives for this invocation.
fn make_flow(config: &MdsfidConfig) -> Result<AuthFlow> {
    let client = IdentityServiceClient::new(config.identity_service.clone())
        .context("failed to build identity service client")?;
    Ok(AuthFlow::new(
        config.handshake.clone(),
        client,
        Arc::new(InMemoryStateStore::new()),
    ))
}

pub async fn authorize_url(config: &MdsfidConfig, args: &RedirectArgs) -> Result<()> {
    let flow = make_flow(config)?;
    let url = flow.start_login(&args.redirect_uri).await?;

    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();

    print_field("State", &state);
    println!("{url}");
    Ok(())
}

pub fn check_redirect(config: &MdsfidConfig, args: &RedirectArgs) -> Result<()> {
    let flow = make_flow(config)?;
    if flow.is_valid_redirect_uri(&args.redirect_uri) {
        print_success(&format!("{} is allowed", args.redirect_uri));
        Ok(())
    } else {
        print_error(&format!("{} is not allowed", args.redirect_uri));
        anyhow::bail!(
            "allowed hosts: {}",
            config.handshake.allowed_redirect_hosts.join(", ")
        )
    }
}

pub fn sign_token(config: &MdsfidConfig) -> Result<()> {
    let client = IdentityServiceClient::new(config.identity_service.clone())?;
    println!("{}", client.sign_service_token()?);
    Ok(())
}

pub async fn create_identity(config: &MdsfidConfig, args: &CreateIdentityArgs) -> Result<()> {
    serde_json::from_str::<Value>(&args.id_user).context("--id-user must be a JSON document")?;

    let client = IdentityServiceClient::new(config.identity_service.clone())?;
    let client_id = args
        .client_id
        .as_deref()
        .unwrap_or(&config.handshake.client_id);

    let id_token = client
        .create_identity(&args.id_user, client_id, &args.redirect_uri)
        .await?;

    print_success("Identity exchange created");
    print_field("id_token", &id_token);
    Ok(())
}

pub async fn resolve_identity(config: &MdsfidConfig, args: &ResolveIdentityArgs) -> Result<()> {
    let flow = make_flow(config)?;
    let identity = flow.resolve_identity(&args.id_token).await?;

    print_success(&format!("Resolved identity {}", identity.formatted_run()));
    let mut summary = json!({
        "national_id": identity.national_id(),
        "check_digit": identity.check_digit(),
    });
    if args.raw {
        summary["raw_payload"] = Value::Object(identity.into_raw_payload());
    }
    print_value(&summary);
    Ok(())
}
