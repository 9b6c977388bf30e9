//! Demo handlers wired into the registry at startup. Replace these with
//! real job classes; they exist to exercise every [`Outcome`] variant end
//! to end.

use std::time::Duration;

use goodjob::handler::{BoxFuture, HandlerOptions, HandlerRegistry, Outcome};
use goodjob::payload::ArgumentValue;
use serde::Deserialize;

#[derive(Deserialize)]
struct EmailSendPayload {
    user_id: i64,
    template: Option<String>,
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

fn first_object_field<'a>(arguments: &'a [ArgumentValue], key: &str) -> Option<&'a ArgumentValue> {
    arguments.iter().find_map(|arg| match arg {
        ArgumentValue::Object { fields, .. } => {
            fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
        }
        _ => None,
    })
}

pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_with_options(
        "EchoJob",
        |_job, arguments| {
            let arguments = arguments.to_vec();
            boxed(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Outcome::Ok(serde_json::json!({ "echoed": arguments.len() }))
            })
        },
        HandlerOptions::new().timeout(Duration::from_secs(5)),
    );

    registry.register_with_options(
        "FailingJob",
        |_job, _arguments| {
            boxed(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Outcome::Error("simulated failure".to_string())
            })
        },
        HandlerOptions::new().timeout(Duration::from_secs(5)),
    );

    registry.register_with_options(
        "EmailSendJob",
        |_job, arguments| {
            let user_id = first_object_field(arguments, "user_id")
                .and_then(|v| match v {
                    ArgumentValue::Number(n) => n.as_i64(),
                    _ => None,
                });
            boxed(async move {
                let payload: Result<EmailSendPayload, _> = match user_id {
                    Some(id) => Ok(EmailSendPayload {
                        user_id: id,
                        template: None,
                    }),
                    None => Err("missing user_id"),
                };
                match payload {
                    Ok(p) => {
                        let _ = p.template;
                        Outcome::Ok(serde_json::json!({ "sent_to": p.user_id }))
                    }
                    Err(reason) => Outcome::Discard(format!("ValidationError: {reason}")),
                }
            })
        },
        HandlerOptions::new()
            .max_concurrency(50)
            .timeout(Duration::from_secs(10)),
    );

    registry
}
