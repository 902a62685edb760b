//! Command execution handlers.

use crate::auth::CredentialProvider;
use crate::channel::http::{HttpChannelConfig, HttpChannelFactory};
use crate::channel::{ChannelFactory, SubscriptionRef, TopicRef};
use crate::cli::{BrokerArgs, Commands};
use crate::config::{LogFormat, PsgateConfig};
use crate::pubsub::{LoggingHandler, Publisher, Subscriber};
use crate::server::gateway::{start_gateway_server, GatewayConfig, GatewayState};
use crate::server::shutdown::{wait_for_signal, ShutdownSignal};
use crate::types::MessageAttributes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Execute a parsed CLI command.
pub async fn execute_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Start {
            broker,
            bind_address,
            port,
            grace_period_secs,
        } => {
            let mut config = load_config(&broker)?;
            if let Some(bind_address) = bind_address {
                config.server.bind_address = bind_address;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(grace) = grace_period_secs {
                config.subscriber.grace_period_secs = grace;
            }
            config.validate()?;
            init_logging(&config);
            run_gateway(config).await
        }
        Commands::Publish {
            broker,
            message,
            attributes,
        } => {
            let config = load_config(&broker)?;
            config.validate()?;
            init_logging(&config);
            run_publish(config, message, attributes.into_iter().collect()).await
        }
    }
}

/// Load the config file (when given) and fold CLI/env overrides onto it.
fn load_config(broker: &BrokerArgs) -> crate::Result<PsgateConfig> {
    let mut config = match &broker.config {
        Some(path) => PsgateConfig::from_file(path)?,
        None => PsgateConfig::default(),
    };

    if let Some(endpoint) = &broker.broker_endpoint {
        config.broker.endpoint = endpoint.clone();
    }
    if let Some(project) = &broker.project {
        config.broker.project_id = project.clone();
    }
    if let Some(topic) = &broker.topic {
        config.broker.topic = topic.clone();
    }
    if let Some(subscription) = &broker.subscription {
        config.broker.subscription = subscription.clone();
    }
    if let Some(token) = &broker.token {
        config.credentials.token = Some(token.clone());
    }
    if let Some(token_file) = &broker.token_file {
        config.credentials.token_file = Some(token_file.clone());
    }
    if broker.allow_anonymous {
        config.credentials.allow_anonymous = true;
    }
    if let Some(timeout) = broker.ack_timeout_secs {
        config.publish.ack_timeout_secs = Some(timeout);
    }

    Ok(config)
}

fn init_logging(config: &PsgateConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = match config.logging.format {
        LogFormat::Text => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // try_init fails when a subscriber is already installed (tests).
    let _ = result;
}

fn build_factory(config: &PsgateConfig) -> crate::Result<Arc<dyn ChannelFactory>> {
    let factory = HttpChannelFactory::new(HttpChannelConfig {
        endpoint: config.broker.endpoint.clone(),
        request_timeout: config.broker.request_timeout_secs.map(Duration::from_secs),
        pull_batch_size: config.subscriber.pull_batch_size,
        max_consecutive_failures: config.subscriber.max_consecutive_failures,
    })?;
    Ok(Arc::new(factory))
}

fn build_publisher(
    config: &PsgateConfig,
    factory: Arc<dyn ChannelFactory>,
    credentials: Arc<CredentialProvider>,
) -> crate::Result<Publisher> {
    let topic = TopicRef::new(config.broker.project_id.clone(), config.broker.topic.clone())?;
    Ok(Publisher::new(
        factory,
        credentials,
        topic,
        config.publish.ack_timeout_secs.map(Duration::from_secs),
    ))
}

async fn run_gateway(config: PsgateConfig) -> anyhow::Result<()> {
    let factory = build_factory(&config)?;
    let credentials = Arc::new(CredentialProvider::new(config.credentials.clone()));

    let publisher = Arc::new(build_publisher(&config, factory.clone(), credentials.clone())?);

    let subscription = SubscriptionRef::new(
        config.broker.project_id.clone(),
        config.broker.subscription.clone(),
    )?;
    let subscriber = Arc::new(Subscriber::new(
        factory,
        credentials,
        subscription,
        Arc::new(LoggingHandler::new()),
        Duration::from_secs(config.subscriber.grace_period_secs),
    ));

    subscriber.start().await?;
    info!(subscription = %subscriber.subscription(), "subscriber started");

    let gateway_config = GatewayConfig {
        bind_address: format!("{}:{}", config.server.bind_address, config.server.port),
        test_payload: config.publish.test_payload.clone(),
    };
    let state = GatewayState::new(
        publisher,
        Some(subscriber.clone()),
        gateway_config.test_payload.as_str(),
    );

    let signal = ShutdownSignal::new();
    let server = tokio::spawn(start_gateway_server(
        gateway_config,
        state,
        signal.subscribe(),
    ));

    wait_for_signal().await;
    signal.shutdown();

    if let Err(e) = subscriber.stop().await {
        error!(error = %e, "subscriber shutdown failed");
    }

    server.await??;
    Ok(())
}

async fn run_publish(
    config: PsgateConfig,
    message: String,
    attributes: MessageAttributes,
) -> anyhow::Result<()> {
    let factory = build_factory(&config)?;
    let credentials = Arc::new(CredentialProvider::new(config.credentials.clone()));
    let publisher = build_publisher(&config, factory, credentials)?;

    let message_id = publisher.publish(message.into_bytes(), attributes).await?;
    println!("{}", message_id);
    Ok(())
}
