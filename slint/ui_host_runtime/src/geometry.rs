use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Rectangles measured inside the sandbox document, relative to its viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SandboxSpace;

/// Rectangles measured in the host window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostSpace;

/// An axis-aligned rectangle tagged with the coordinate space it was measured in.
///
/// The space only exists at the type level. A `Rect<SandboxSpace>` can become a
/// `Rect<HostSpace>` only through [`project`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Rect<S> {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(skip)]
    space: PhantomData<S>,
}

impl<S> Rect<S> {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            space: PhantomData,
        }
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Finite coordinates and non-negative size.
    pub fn is_well_formed(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|value| value.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left() && x < self.right() && y >= self.top() && y < self.bottom()
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Maps a sandbox-viewport rectangle into host coordinates relative to the
/// overlay container.
///
/// Returns `None` while either the surface or the container has not been
/// measured yet; callers draw nothing in that case.
pub fn project(
    rect: &Rect<SandboxSpace>,
    surface: Option<&Rect<HostSpace>>,
    container: Option<&Rect<HostSpace>>,
) -> Option<Rect<HostSpace>> {
    let (surface, container) = (surface?, container?);
    let offset_left = surface.left() - container.left();
    let offset_top = surface.top() - container.top();

    Some(Rect::new(
        offset_left + rect.x,
        offset_top + rect.y,
        rect.width,
        rect.height,
    ))
}
