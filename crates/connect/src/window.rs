//! Detached window abstraction.
//!
//! Browsers expose `window.open` and `window.closed`; native hosts open the
//! system browser. Both sit behind [`WindowHost`].

use std::fmt;

use tracing::warn;

/// Available screen area, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenGeometry {
    fn default() -> Self {
        Self {
            left: 0,
            top: 0,
            width: 1280,
            height: 800,
        }
    }
}

/// Size and position of the authorization popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFeatures {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

impl WindowFeatures {
    /// Center a `width` x `height` window on `screen`, shrinking it to fit.
    #[must_use]
    pub fn centered(screen: ScreenGeometry, width: u32, height: u32) -> Self {
        let width = width.min(screen.width);
        let height = height.min(screen.height);
        let left = screen.left + ((screen.width - width) / 2) as i32;
        let top = screen.top + ((screen.height - height) / 2) as i32;
        Self {
            width,
            height,
            left,
            top,
        }
    }
}

/// Renders the `window.open` feature string.
impl fmt::Display for WindowFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "width={},height={},left={},top={},toolbar=no,menubar=no,scrollbars=yes,resizable=yes",
            self.width, self.height, self.left, self.top
        )
    }
}

/// A window opened by [`WindowHost::open`].
pub trait WindowHandle: Send + Sync {
    /// Whether the user (or the relay) closed the window.
    fn is_closed(&self) -> bool;
}

pub trait WindowHost: Send + Sync {
    fn screen(&self) -> ScreenGeometry;

    /// Open `url` in a new window named `name`.
    ///
    /// Returns `None` when the environment refuses (pop-up blocking).
    fn open(&self, url: &str, name: &str, features: &WindowFeatures)
    -> Option<Box<dyn WindowHandle>>;
}

/// Opens the system browser. The callback router relays the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

/// A browser tab we cannot observe once launched.
struct BrowserTab;

impl WindowHandle for BrowserTab {
    fn is_closed(&self) -> bool {
        false
    }
}

impl WindowHost for SystemBrowser {
    fn screen(&self) -> ScreenGeometry {
        ScreenGeometry::default()
    }

    fn open(
        &self,
        url: &str,
        _name: &str,
        _features: &WindowFeatures,
    ) -> Option<Box<dyn WindowHandle>> {
        match open::that(url) {
            Ok(()) => Some(Box::new(BrowserTab)),
            Err(e) => {
                warn!(error = %e, "could not launch system browser");
                None
            },
        }
    }
}
