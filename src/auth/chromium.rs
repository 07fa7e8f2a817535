//! Headless Chromium over CDP.

use crate::auth::{
    engine::{
        discard, BoxFuture, BrowserCookie, Engine, EngineError, EngineSession, PageCookie,
        ResourceKind,
    },
    jar::SameSite,
};
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        fetch::{EnableParams, EventRequestPaused, FailRequestParams, RequestPattern, RequestStage},
        network::{
            CookieParam, CookieSameSite, ErrorReason, EventLoadingFailed, EventLoadingFinished,
            EventRequestWillBeSent, ResourceType, SetCookiesParams, SetUserAgentOverrideParams,
            TimeSinceEpoch,
        },
    },
    Page,
};
use futures::StreamExt;
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, trace};
use ulid::Ulid;
use url::Url;

/// Network counts as idle with at most this many requests in flight...
const IDLE_MAX_INFLIGHT: usize = 2;
/// ...for this long.
const IDLE_QUIET: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ChromiumSettings {
    /// `None` lets chromiumoxide look for an installed Chrome/Chromium.
    pub executable: Option<PathBuf>,
    /// Needed when running as root inside containers.
    pub no_sandbox: bool,
    pub launch_timeout: Duration,
    /// Upper bound for a single CDP command, including page loads.
    pub request_timeout: Duration,
}

impl Default for ChromiumSettings {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: false,
            launch_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChromiumEngine {
    settings: ChromiumSettings,
}

impl ChromiumEngine {
    #[must_use]
    pub const fn new(settings: ChromiumSettings) -> Self {
        Self { settings }
    }
}

fn protocol(err: impl std::fmt::Display) -> EngineError {
    EngineError::Protocol(err.to_string())
}

impl Engine for ChromiumEngine {
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn EngineSession>, EngineError>> {
        Box::pin(async move {
            let profile_dir = std::env::temp_dir().join(format!("magang-chromium-{}", Ulid::new()));

            let mut builder = BrowserConfig::builder()
                .user_data_dir(&profile_dir)
                .launch_timeout(self.settings.launch_timeout)
                .request_timeout(self.settings.request_timeout)
                .arg("--disable-dev-shm-usage")
                .arg("--disable-gpu");
            if self.settings.no_sandbox {
                builder = builder.no_sandbox();
            }
            if let Some(executable) = &self.settings.executable {
                builder = builder.chrome_executable(executable);
            }
            let config = builder.build().map_err(EngineError::Launch)?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|err| EngineError::Launch(err.to_string()))?;

            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(err) = event {
                        trace!("CDP handler: {err}");
                    }
                }
            });

            let mut session = ChromiumSession {
                browser,
                page: None,
                handler_task,
                tasks: Vec::new(),
                activity: Arc::default(),
                profile_dir,
            };

            match session.open_page().await {
                Ok(()) => Ok(Box::new(session) as Box<dyn EngineSession>),
                Err(err) => Err(discard(Box::new(session), err).await),
            }
        })
    }
}

#[derive(Debug)]
struct Activity {
    inflight: HashSet<String>,
    changed: Instant,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            inflight: HashSet::new(),
            changed: Instant::now(),
        }
    }
}

fn touch(activity: &Mutex<Activity>, update: impl FnOnce(&mut HashSet<String>)) {
    let mut activity = activity.lock().unwrap_or_else(PoisonError::into_inner);
    update(&mut activity.inflight);
    activity.changed = Instant::now();
}

async fn settle(activity: &Mutex<Activity>) {
    loop {
        let quiet_for = {
            let activity = activity.lock().unwrap_or_else(PoisonError::into_inner);
            if activity.inflight.len() <= IDLE_MAX_INFLIGHT {
                activity.changed.elapsed()
            } else {
                Duration::ZERO
            }
        };
        if quiet_for >= IDLE_QUIET {
            return;
        }
        sleep(IDLE_POLL).await;
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Option<Page>,
    handler_task: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    activity: Arc<Mutex<Activity>>,
    profile_dir: PathBuf,
}

impl ChromiumSession {
    async fn open_page(&mut self) -> Result<(), EngineError> {
        let page = self.browser.new_page("about:blank").await.map_err(protocol)?;

        let mut sent = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(protocol)?;
        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(protocol)?;
        let mut failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(protocol)?;

        let activity = Arc::clone(&self.activity);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = sent.next().await {
                touch(&activity, |inflight| {
                    inflight.insert(event.request_id.inner().clone());
                });
            }
        }));
        let activity = Arc::clone(&self.activity);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = finished.next().await {
                touch(&activity, |inflight| {
                    inflight.remove(event.request_id.inner());
                });
            }
        }));
        let activity = Arc::clone(&self.activity);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = failed.next().await {
                touch(&activity, |inflight| {
                    inflight.remove(event.request_id.inner());
                });
            }
        }));

        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page, EngineError> {
        self.page
            .as_ref()
            .ok_or_else(|| protocol("page is not open"))
    }

    fn mark_busy(&self) {
        touch(&self.activity, |_| {});
    }
}

const fn resource_type(kind: ResourceKind) -> ResourceType {
    match kind {
        ResourceKind::Image => ResourceType::Image,
        ResourceKind::Stylesheet => ResourceType::Stylesheet,
        ResourceKind::Font => ResourceType::Font,
        ResourceKind::Media => ResourceType::Media,
    }
}

const fn same_site(value: SameSite) -> CookieSameSite {
    match value {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

fn cookie_param(cookie: BrowserCookie) -> Result<CookieParam, EngineError> {
    let mut builder = CookieParam::builder()
        .name(cookie.name)
        .value(cookie.value)
        .domain(cookie.domain)
        .path(cookie.path)
        .secure(cookie.secure)
        .http_only(cookie.http_only)
        .same_site(same_site(cookie.same_site));
    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    builder.build().map_err(protocol)
}

impl EngineSession for ChromiumSession {
    fn block_resources<'a>(
        &'a mut self,
        kinds: &'a [ResourceKind],
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let page = self.page()?.clone();

            let patterns = kinds
                .iter()
                .map(|kind| RequestPattern {
                    url_pattern: Some("*".to_string()),
                    resource_type: Some(resource_type(*kind)),
                    request_stage: Some(RequestStage::Request),
                })
                .collect();

            let mut paused = page
                .event_listener::<EventRequestPaused>()
                .await
                .map_err(protocol)?;
            page.execute(EnableParams {
                patterns: Some(patterns),
                handle_auth_requests: None,
            })
            .await
            .map_err(protocol)?;

            // Only the blocked kinds are intercepted, so every paused request gets failed.
            self.tasks.push(tokio::spawn(async move {
                while let Some(event) = paused.next().await {
                    let fail = FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
                    if let Err(err) = page.execute(fail).await {
                        trace!("failed to abort request: {err}");
                    }
                }
            }));

            Ok(())
        })
    }

    fn set_user_agent<'a>(
        &'a mut self,
        user_agent: &'a str,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            self.page()?
                .execute(SetUserAgentOverrideParams::new(user_agent))
                .await
                .map_err(protocol)?;
            Ok(())
        })
    }

    fn set_cookies(&mut self, cookies: Vec<BrowserCookie>) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let cookies = cookies
                .into_iter()
                .map(cookie_param)
                .collect::<Result<Vec<_>, _>>()?;
            self.page()?
                .execute(SetCookiesParams::new(cookies))
                .await
                .map_err(protocol)?;
            Ok(())
        })
    }

    fn goto<'a>(&'a mut self, url: &'a Url) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            self.mark_busy();
            self.page()?.goto(url.as_str()).await.map_err(protocol)?;
            settle(&self.activity).await;
            Ok(())
        })
    }

    fn click_and_settle<'a>(
        &'a mut self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<bool, EngineError>> {
        Box::pin(async move {
            let page = self.page()?;
            let Ok(element) = page.find_element(selector).await else {
                return Ok(false);
            };

            self.mark_busy();
            element.click().await.map_err(protocol)?;
            if let Err(err) = page.wait_for_navigation().await {
                debug!("navigation after click: {err}");
            }
            settle(&self.activity).await;
            Ok(true)
        })
    }

    fn cookies(&mut self) -> BoxFuture<'_, Result<Vec<PageCookie>, EngineError>> {
        Box::pin(async move {
            let cookies = self.page()?.get_cookies().await.map_err(protocol)?;
            Ok(cookies
                .into_iter()
                .map(|cookie| PageCookie {
                    name: cookie.name,
                    value: cookie.value,
                })
                .collect())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin(async move {
            let Self {
                mut browser,
                page,
                handler_task,
                tasks,
                profile_dir,
                ..
            } = *self;
            drop(page);

            let closed = browser.close().await.map(|_| ()).map_err(protocol);
            if let Err(err) = browser.wait().await {
                debug!("waiting for browser exit: {err}");
            }

            for task in tasks {
                task.abort();
            }
            handler_task.abort();

            if let Err(err) = tokio::fs::remove_dir_all(&profile_dir).await {
                debug!("removing browser profile {}: {err}", profile_dir.display());
            }

            closed
        })
    }
}
