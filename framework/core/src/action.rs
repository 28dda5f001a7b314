use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio::time::{Instant, sleep_until};
use tracing::error;

use crate::{
    config::Config,
    error::ActionError,
    scenario::{Callback, Scenario},
    session::{Session, TaskHandle},
    transport::http::{HttpMethod, RequestOptions},
    value::{ActionKey, MetricKey, Value, WsFrame},
    worker::panic_message,
};

/// Outcome envelope actions hand back to the execution driver.
pub type ActionOutcome = Result<(), ActionError>;

/// A command the engine can execute against a session.
///
/// Every variant observes the uniform failure policy applied by
/// [`Session::execute`]: an error is recorded under the action's key and the
/// scenario keeps running.
#[derive(Clone)]
pub enum Action {
    Http {
        method: HttpMethod,
        path: String,
        options: RequestOptions,
    },
    WsConnect {
        path: String,
        reconnect: bool,
    },
    WsSend {
        frame: WsFrame,
        await_ack: bool,
    },
    WsRecv {
        timeout: Option<Duration>,
    },
    Call {
        name: String,
        args: Vec<Value>,
    },
    Async {
        name: String,
        args: Vec<Value>,
    },
    Spread {
        name: String,
        args: Vec<Value>,
        rate: u32,
        interval: Duration,
    },
    Loop {
        name: String,
        inner: Box<Action>,
        duration: Duration,
    },
    RunScenario {
        scenario: Arc<dyn Scenario>,
        overlay: Config,
    },
}

impl Action {
    #[must_use]
    pub fn http_get(path: impl Into<String>) -> Self {
        Self::Http {
            method: HttpMethod::Get,
            path: path.into(),
            options: RequestOptions::new(),
        }
    }

    #[must_use]
    pub fn call(name: impl Into<String>) -> Self {
        Self::Call {
            name: name.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn run_scenario(scenario: Arc<dyn Scenario>, overlay: Config) -> Self {
        Self::RunScenario { scenario, overlay }
    }

    /// Structural key identifying this action in results and errors.
    #[must_use]
    pub fn key(&self, session: &Session) -> ActionKey {
        match self {
            Self::Http { method, path, .. } => ActionKey::Http {
                method: *method,
                path: path.clone(),
            },
            Self::WsConnect { path, .. } => ActionKey::WsConnect { path: path.clone() },
            Self::WsSend { .. } => ActionKey::WsSend {
                path: session_ws_path(session),
            },
            Self::WsRecv { .. } => ActionKey::WsRecv,
            Self::Call { name, .. } => ActionKey::Call { name: name.clone() },
            Self::Async { name, .. } | Self::Spread { name, .. } => {
                ActionKey::Task { name: name.clone() }
            }
            Self::Loop { name, .. } => ActionKey::Loop { name: name.clone() },
            Self::RunScenario { scenario, .. } => ActionKey::Scenario {
                name: scenario.name().to_owned(),
            },
        }
    }

    /// Name a loop over this action is keyed under.
    #[must_use]
    pub fn loop_name(&self) -> String {
        match self {
            Self::Call { name, .. } | Self::Async { name, .. } | Self::Spread { name, .. } => {
                name.clone()
            }
            Self::Http { method, path, .. } => format!("{method} {path}"),
            Self::WsConnect { path, .. } => format!("ws_connect {path}"),
            Self::WsSend { .. } => "ws_send".to_owned(),
            Self::WsRecv { .. } => "ws_recv".to_owned(),
            Self::Loop { name, .. } => name.clone(),
            Self::RunScenario { scenario, .. } => scenario.name().to_owned(),
        }
    }

    pub(crate) async fn run(self, session: &mut Session) -> ActionOutcome {
        match self {
            Self::Http {
                method,
                path,
                options,
            } => run_http(session, method, path, options).await,
            Self::WsConnect { path, reconnect } => run_ws_connect(session, path, reconnect).await,
            Self::WsSend { frame, await_ack } => run_ws_send(session, frame, await_ack).await,
            Self::WsRecv { timeout } => run_ws_recv(session, timeout).await,
            Self::Call { name, args } => run_call(session, name, args).await,
            Self::Async { name, args } => run_async(session, name, args),
            Self::Spread {
                name,
                args,
                rate,
                interval,
            } => run_spread(session, name, args, rate, interval).await,
            Self::Loop {
                inner, duration, ..
            } => run_loop(session, *inner, duration).await,
            Self::RunScenario { scenario, overlay } => {
                run_nested_scenario(session, scenario, overlay).await
            }
        }
    }
}

fn session_ws_path(session: &Session) -> String {
    session
        .ws()
        .map(|conn| conn.path().to_owned())
        .unwrap_or_default()
}

async fn run_http(
    session: &mut Session,
    method: HttpMethod,
    path: String,
    options: RequestOptions,
) -> ActionOutcome {
    let client = session.http().clone();
    let started = Instant::now();
    let response = client
        .request(method, &path, &options, session.timeout())
        .await?;

    session.add_metric(
        MetricKey::Http { path: path.clone() },
        Value::Duration(started.elapsed()),
    );
    session.add_result(ActionKey::Http { method, path }, Value::Http(response));
    Ok(())
}

async fn run_ws_connect(session: &mut Session, path: String, reconnect: bool) -> ActionOutcome {
    if session.ws().is_some() && !reconnect {
        return Err(ActionError::AlreadyConnected);
    }

    let started = Instant::now();
    let conn = crate::transport::ws::WsConn::connect(session.http().base_url(), &path).await?;
    session.add_metric(
        MetricKey::WsConnect { path },
        Value::Duration(started.elapsed()),
    );
    session.set_ws(conn);
    Ok(())
}

async fn run_ws_send(session: &mut Session, frame: WsFrame, await_ack: bool) -> ActionOutcome {
    let deadline = session.timeout();
    let started = Instant::now();

    let path = {
        let conn = session.ws_mut().ok_or(ActionError::NotConnected)?;
        let path = conn.path().to_owned();
        conn.send(frame).await?;
        if await_ack {
            match conn.recv_timeout(deadline).await {
                Some(Ok(_ack)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => return Err(ActionError::WsRecvTimeout { timeout: deadline }),
            }
        }
        path
    };

    session.add_metric(MetricKey::WsSend { path }, Value::Duration(started.elapsed()));
    Ok(())
}

async fn run_ws_recv(session: &mut Session, timeout: Option<Duration>) -> ActionOutcome {
    let deadline = timeout.unwrap_or_else(|| session.timeout());

    let frame = {
        let conn = session.ws_mut().ok_or(ActionError::NotConnected)?;
        match conn.recv_timeout(deadline).await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return Err(err.into()),
            None => return Err(ActionError::WsRecvTimeout { timeout: deadline }),
        }
    };

    session.add_result(ActionKey::WsRecv, Value::Ws(frame));
    Ok(())
}

async fn run_call(session: &mut Session, name: String, args: Vec<Value>) -> ActionOutcome {
    let callback = session.callback(&name)?;
    let outcome = AssertUnwindSafe(callback.invoke(session, &args))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ActionError::Callback { name, source }),
        Err(panic) => Err(ActionError::CallbackPanicked {
            name,
            message: panic_message(panic),
        }),
    }
}

fn run_async(session: &mut Session, name: String, args: Vec<Value>) -> ActionOutcome {
    let callback = session.callback(&name)?;
    let child = session.fork();
    let child_name = name.clone();

    let handle = tokio::spawn(async move {
        let mut child = child;
        if let Err(source) = callback.invoke(&mut child, &args).await {
            error!(session = %child.id(), task = %child_name, %source, "forked callback failed");
            child.record_error(
                ActionKey::Call {
                    name: child_name.clone(),
                },
                ActionError::Callback {
                    name: child_name,
                    source,
                },
            );
        }
        child
    });

    session.add_async_task(&name, TaskHandle::new(name.clone(), handle));
    Ok(())
}

/// Fan out `rate` forks evenly across `interval`: the first at t = 0, the
/// last at `interval * (rate - 1) / rate`. Joining is the caller's job.
async fn run_spread(
    session: &mut Session,
    name: String,
    args: Vec<Value>,
    rate: u32,
    interval: Duration,
) -> ActionOutcome {
    if rate == 0 {
        return Ok(());
    }

    let gap = interval / rate;
    let start = Instant::now();
    for index in 0..rate {
        sleep_until(start + gap * index).await;
        session
            .execute_boxed(Action::Async {
                name: name.clone(),
                args: args.clone(),
            })
            .await;
    }
    Ok(())
}

/// Run `inner` until `duration` elapses. The deadline is fixed once at
/// entry on the monotonic clock; inner failures are recorded by the driver
/// and iteration continues. The loop itself cannot fail.
async fn run_loop(session: &mut Session, inner: Action, duration: Duration) -> ActionOutcome {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        session.execute_boxed(inner.clone()).await;
    }
    Ok(())
}

async fn run_nested_scenario(
    session: &mut Session,
    scenario: Arc<dyn Scenario>,
    overlay: Config,
) -> ActionOutcome {
    let name = scenario.name().to_owned();
    let config = session.config().clone().overlay(overlay);
    let mut child = session.fork_with_config(config);

    let outcome = match scenario.init(&mut child).await {
        Ok(()) => scenario.run(&mut child).await,
        Err(source) => Err(source),
    };

    // Whatever the child managed to record is kept, even on failure.
    let (results, metrics, _errors) = child.into_parts();
    crate::merge::merge_series(session.results_mut(), results);
    crate::merge::merge_series(session.metrics_mut(), metrics);

    outcome.map_err(|source| ActionError::Scenario { name, source })
}
