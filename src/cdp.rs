//! Chrome DevTools Protocol surface (uses the `headless_chrome` crate)
//!
//! Each launch starts its own headless Chrome process with one tab sized to
//! the poster. The process is killed when the surface is closed.

use std::ffi::OsStr;
use std::sync::Arc;

use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};

use crate::{Error, LaunchSpec, Launcher, Result, Surface};

/// Page binding receiving forwarded console output
const CONSOLE_BINDING: &str = "__mapposter_console";

/// Wraps `console.warn` and `console.error` so renderer problems reach our log.
const CONSOLE_WRAPPER: &str = r#"(function(){
    const bind = window.__mapposter_console;
    if (!bind) return;
    ['warn','error'].forEach(function(k){
        const orig = console[k];
        console[k] = function(...args){
            try{ bind(JSON.stringify({ level:k, args: args.map(a=>String(a)) })); }catch(e){}
            try{ orig.apply(console, args); }catch(e){}
        };
    });
})();"#;

/// Launches one headless Chrome process per job
#[derive(Debug, Clone, Copy, Default)]
pub struct CdpLauncher;

impl Launcher for CdpLauncher {
    type Surface = CdpSurface;

    fn launch(&self, spec: &LaunchSpec) -> Result<CdpSurface> {
        let flags = spec.profile.flags();
        let args: Vec<&OsStr> = flags.iter().map(|f| OsStr::new(*f)).collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .enable_gpu(true)
            .enable_logging(false)
            .window_size(Some((spec.viewport.width, spec.viewport.height)))
            .path(spec.chrome_path.clone())
            .args(args)
            .idle_browser_timeout(spec.idle_timeout)
            .build()
            .map_err(|e| Error::LaunchError(format!("Failed to build launch options: {}", e)))?;

        info!(
            "[{}] Launching Chrome ({} profile, {} flags)",
            spec.job_id,
            spec.profile,
            flags.len()
        );
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::LaunchError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::LaunchError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(spec.navigation_timeout);
        pin_viewport(&tab, spec)?;

        let surface = CdpSurface {
            browser: Some(browser),
            tab,
            job_id: spec.job_id.clone(),
        };
        surface.forward_console();
        Ok(surface)
    }
}

/// Fix the page viewport to the poster size at device scale factor 1.
fn pin_viewport(tab: &Tab, spec: &LaunchSpec) -> Result<()> {
    let too_large = |_| Error::LaunchError(format!("Viewport {} out of range", spec.viewport));
    tab.call_method(Emulation::SetDeviceMetricsOverride {
        width: spec.viewport.width.try_into().map_err(too_large)?,
        height: spec.viewport.height.try_into().map_err(too_large)?,
        device_scale_factor: 1.0,
        mobile: false,
        scale: None,
        screen_width: None,
        screen_height: None,
        position_x: None,
        position_y: None,
        dont_set_visible_size: None,
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    })
    .map_err(|e| Error::LaunchError(format!("Failed to set viewport: {}", e)))?;
    debug!("[{}] Viewport pinned to {}", spec.job_id, spec.viewport);
    Ok(())
}

pub struct CdpSurface {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    job_id: String,
}

impl CdpSurface {
    /// Forward renderer console warnings and errors to the log. Best effort:
    /// a page without forwarding still renders.
    fn forward_console(&self) {
        let job_id = self.job_id.clone();
        self.tab
            .expose_function(
                CONSOLE_BINDING,
                Arc::new(move |payload: serde_json::Value| {
                    let msg = match payload.as_str() {
                        Some(s) => serde_json::from_str::<serde_json::Value>(s)
                            .unwrap_or_else(|_| serde_json::Value::String(s.to_string())),
                        None => payload,
                    };
                    let level = msg.get("level").and_then(|l| l.as_str()).unwrap_or("log");
                    let text = match msg.get("args").and_then(|a| a.as_array()) {
                        Some(args) => args
                            .iter()
                            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                            .collect::<Vec<_>>()
                            .join(" "),
                        None => msg.to_string(),
                    };
                    match level {
                        "error" => warn!("[{}] Renderer error: {}", job_id, text),
                        _ => debug!("[{}] Renderer {}: {}", job_id, level, text),
                    }
                }),
            )
            .map_err(|e| warn!("[{}] Failed to expose console binding: {}", self.job_id, e))
            .ok();

        self.tab
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: CONSOLE_WRAPPER.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map_err(|e| warn!("[{}] Failed to inject console wrapper: {}", self.job_id, e))
            .ok();
    }
}

impl Surface for CdpSurface {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    fn evaluate_flag(&mut self, expression: &str) -> Result<bool> {
        let result = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(result
            .value
            .as_ref()
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    fn capture_png(&mut self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::CaptureError(format!("Screenshot failed: {}", e)))
    }

    fn close(&mut self) -> Result<()> {
        // dropping the browser kills the Chrome process
        if let Some(browser) = self.browser.take() {
            debug!("[{}] Terminating Chrome", self.job_id);
            drop(browser);
        }
        Ok(())
    }
}
