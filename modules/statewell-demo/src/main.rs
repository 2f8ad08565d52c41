use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use statewell_engine::{
    data_component, ClassOptions, ComponentStore, Event, Field, FieldValue, MemoryHost,
    ReductionContext, StoreConfig, Template,
};

fn counter() -> Arc<Template> {
    Template::builder("Counter")
        .extends(&data_component())
        .field(
            "data",
            Field::with_default(json!(0), |previous, event, ctx| {
                if event.is("TICK") && ctx.is_target_for(event) {
                    Ok(json!(previous.as_i64().unwrap_or(0) + 1).into())
                } else {
                    Ok(previous)
                }
            }),
        )
        .build()
}

fn double(ctx: &ReductionContext<'_>) -> FieldValue {
    let count = ctx
        .reference("Counter")
        .and_then(|counter| counter.value("data"))
        .and_then(|data| data.as_i64())
        .unwrap_or(0);
    json!(count * 2).into()
}

fn doubled() -> Arc<Template> {
    Template::builder("Doubled")
        .extends(&data_component())
        .field(
            "counter",
            Field::new(
                |ctx| ctx.reference("Counter").into(),
                |_, _, ctx| Ok(ctx.reference("Counter").into()),
            ),
        )
        .field("data", Field::new(double, |_, _, ctx| Ok(double(ctx))))
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("statewell=info".parse()?))
        .init();

    info!("Statewell demo starting...");

    let config = StoreConfig::from_env();

    // Optional --ticks N, default 3
    let ticks = match std::env::args().nth(1).as_deref() {
        Some("--ticks") => std::env::args()
            .nth(2)
            .context("--ticks requires a count")?
            .parse::<u32>()
            .context("--ticks must be a non-negative integer")?,
        _ => 3,
    };

    let host = Arc::new(
        MemoryHost::new()
            .connect(&counter(), ClassOptions::new())
            .connect(&doubled(), ClassOptions::new()),
    );
    let store = ComponentStore::attach(host.clone(), config)?;
    store.methods().rehydrate().await?;

    for _ in 0..ticks {
        store.dispatch(Event::targeted("TICK", "Counter"))?;
    }

    let reflected = host.reflected();
    info!(components = reflected.len(), ticks, "Reflection settled");
    println!("{}", serde_json::to_string_pretty(&reflected)?);

    Ok(())
}
