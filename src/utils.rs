use std::collections::HashMap;

use tokio::{
    sync::watch,
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};

use crate::models::{
    retry::RetryConfig,
    template::{RenderedEmail, Template},
};

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);

                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(
                    delay_ms.saturating_mul(config.backoff_multiplier),
                    config.max_delay_ms,
                );
            }
        }
    }
}

/// Variables available to a template: the recipient fields overlaid with the
/// request data, so `data` wins on a name clash.
pub fn template_variables(
    user_name: &str,
    user_email: &str,
    data: &HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    let mut variables = HashMap::with_capacity(data.len() + 2);
    variables.insert(
        "user_name".to_string(),
        serde_json::Value::String(user_name.to_string()),
    );
    variables.insert(
        "user_email".to_string(),
        serde_json::Value::String(user_email.to_string()),
    );
    variables.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
    variables
}

pub fn render_template(
    template: &Template,
    variables: &HashMap<String, serde_json::Value>,
) -> RenderedEmail {
    debug!(
        template_id = template.id,
        variable_count = variables.len(),
        "Rendering template"
    );

    RenderedEmail {
        subject: replace_variables(&template.subject, variables),
        html: replace_variables(&template.html_content, variables),
    }
}

/// Replaces every `{{key}}` whose key is in `variables`. The text is scanned
/// once, left to right, and substituted values are never rescanned, so the
/// result does not depend on map iteration order. Unknown placeholders are
/// left as they are.
pub fn replace_variables(text: &str, variables: &HashMap<String, serde_json::Value>) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let candidate = &rest[start + 2..];

        let replaced = candidate.find("}}").and_then(|end| {
            variables
                .get(&candidate[..end])
                .map(|value| (value_to_text(value), end))
        });

        match replaced {
            Some((value, end)) => {
                result.push_str(&value);
                rest = &candidate[end + 2..];
            }
            None => {
                // Keep one brace and rescan from the next character so that
                // "{{{name}}}" still finds "{{name}}".
                result.push('{');
                rest = &rest[start + 1..];
            }
        }
    }

    result.push_str(rest);
    result
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Resolves once `true` has been sent on the shutdown channel, or the sender
/// is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
