//! Scripted engine for exercising the bridge without a real browser.

use crate::auth::engine::{
    BoxFuture, BrowserCookie, Engine, EngineError, EngineSession, PageCookie, ResourceKind,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub launch_fails: bool,
    pub goto_hangs: bool,
    pub goto_fails: bool,
    pub goto_delay: Option<Duration>,
    pub login_button: bool,
    pub click_hangs: bool,
    pub close_fails: bool,
    /// Cookie read (0-based) from which `accessToken` shows up; `None` means never.
    pub token_after: Option<usize>,
    /// `accessToken` is only visible on the read where it first appears.
    pub token_flickers: bool,
    pub token_value: String,
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub blocked: Vec<ResourceKind>,
    pub user_agent: Option<String>,
    pub cookies: Vec<BrowserCookie>,
    pub visited: Vec<String>,
    pub clicked: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    launches: AtomicUsize,
    closes: AtomicUsize,
    recorded: Mutex<Recorded>,
}

#[derive(Debug, Clone)]
pub struct FakeEngine {
    script: Script,
    state: Arc<State>,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            state: Arc::default(),
        }
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn recorded<T>(&self, read: impl FnOnce(&Recorded) -> T) -> T {
        let recorded = self
            .state
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        read(&recorded)
    }
}

impl Engine for FakeEngine {
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn EngineSession>, EngineError>> {
        Box::pin(async move {
            if self.script.launch_fails {
                return Err(EngineError::Launch("no chrome binary".to_string()));
            }
            self.state.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                script: self.script.clone(),
                state: Arc::clone(&self.state),
                reads: 0,
            }) as Box<dyn EngineSession>)
        })
    }
}

struct FakeSession {
    script: Script,
    state: Arc<State>,
    reads: usize,
}

impl FakeSession {
    fn record(&self, write: impl FnOnce(&mut Recorded)) {
        let mut recorded = self
            .state
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        write(&mut recorded);
    }
}

impl EngineSession for FakeSession {
    fn block_resources<'a>(
        &'a mut self,
        kinds: &'a [ResourceKind],
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            self.record(|r| r.blocked.extend_from_slice(kinds));
            Ok(())
        })
    }

    fn set_user_agent<'a>(
        &'a mut self,
        user_agent: &'a str,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            self.record(|r| r.user_agent = Some(user_agent.to_string()));
            Ok(())
        })
    }

    fn set_cookies(&mut self, cookies: Vec<BrowserCookie>) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            self.record(|r| r.cookies.extend(cookies));
            Ok(())
        })
    }

    fn goto<'a>(&'a mut self, url: &'a Url) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            self.record(|r| r.visited.push(url.to_string()));
            if self.script.goto_fails {
                return Err(EngineError::Protocol("target crashed".to_string()));
            }
            if self.script.goto_hangs {
                futures::future::pending::<()>().await;
            }
            if let Some(delay) = self.script.goto_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        })
    }

    fn click_and_settle<'a>(
        &'a mut self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<bool, EngineError>> {
        Box::pin(async move {
            if !self.script.login_button {
                return Ok(false);
            }
            self.record(|r| r.clicked.push(selector.to_string()));
            if self.script.click_hangs {
                futures::future::pending::<()>().await;
            }
            Ok(true)
        })
    }

    fn cookies(&mut self) -> BoxFuture<'_, Result<Vec<PageCookie>, EngineError>> {
        Box::pin(async move {
            let read = self.reads;
            self.reads += 1;

            let mut cookies = vec![PageCookie {
                name: "XSRF-TOKEN".to_string(),
                value: "x".to_string(),
            }];
            let visible = match self.script.token_after {
                Some(from) if self.script.token_flickers => read == from,
                Some(from) => read >= from,
                None => false,
            };
            if visible {
                cookies.push(PageCookie {
                    name: "accessToken".to_string(),
                    value: self.script.token_value.clone(),
                });
            }
            Ok(cookies)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), EngineError>> {
        Box::pin(async move {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            if self.script.close_fails {
                return Err(EngineError::Protocol("browser already gone".to_string()));
            }
            Ok(())
        })
    }
}
