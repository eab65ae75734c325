//! Document extent from `.kicad_pcb` s-expressions.
//!
//! The extent covers every drawn item: board graphics, tracks, vias, zones
//! and the contents of each footprint placed through its `(at x y [rot])`.
//! Coordinates in the file are millimetres relative to the page origin,
//! which is also the origin of the exported PDF page.

use std::f64::consts::{FRAC_PI_2, TAU};

use camino::Utf8Path;
use kiff_api::BoundingBox;
use kiff_render_api::{RenderError, RenderResult};

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    fn head(&self) -> Option<&str> {
        match self {
            Self::List(items) => match items.first() {
                Some(Self::Atom(atom)) => Some(atom.as_str()),
                _ => None,
            },
            Self::Atom(_) => None,
        }
    }

    fn children(&self) -> &[Self] {
        match self {
            Self::List(items) => items,
            Self::Atom(_) => &[],
        }
    }

    fn child(&self, name: &str) -> Option<&Self> {
        self.children().iter().find(|item| item.head() == Some(name))
    }

    fn atom(&self, index: usize) -> Option<&str> {
        match self.children().get(index) {
            Some(Self::Atom(atom)) => Some(atom.as_str()),
            _ => None,
        }
    }

    fn number(&self, index: usize) -> Option<f64> {
        self.atom(index)?.parse().ok()
    }

    fn point(&self, name: &str) -> Option<(f64, f64)> {
        let node = self.child(name)?;
        Some((node.number(1)?, node.number(2)?))
    }

    fn polygon(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let pts = self
            .child("pts")
            .or_else(|| self.child("polygon").and_then(|poly| poly.child("pts")));
        pts.map(Self::children)
            .unwrap_or_default()
            .iter()
            .filter(|xy| xy.head() == Some("xy"))
            .filter_map(|xy| Some((xy.number(1)?, xy.number(2)?)))
    }
}

/// Position and rotation of a footprint on the page.
#[derive(Debug, Clone, Copy)]
struct Placement {
    origin: (f64, f64),
    degrees: f64,
}

impl Placement {
    const PAGE: Self = Self {
        origin: (0.0, 0.0),
        degrees: 0.0,
    };

    fn of(footprint: &Sexp) -> Self {
        let Some(at) = footprint.child("at") else {
            return Self::PAGE;
        };
        Self {
            origin: (at.number(1).unwrap_or(0.0), at.number(2).unwrap_or(0.0)),
            degrees: at.number(3).unwrap_or(0.0),
        }
    }

    /// Page coordinates of a footprint-local point. Positive angles turn
    /// counter-clockwise on screen, where y grows downwards.
    fn apply(self, (x, y): (f64, f64)) -> (f64, f64) {
        let (sin, cos) = self.degrees.to_radians().sin_cos();
        (
            self.origin.0 + x * cos + y * sin,
            self.origin.1 - x * sin + y * cos,
        )
    }
}

/// Read `document` and compute the extent of everything drawn on it.
///
/// # Errors
///
/// Returns [`RenderError::Unreadable`] when the file cannot be read.
pub fn read_document_bounds(document: &Utf8Path) -> RenderResult<Option<BoundingBox>> {
    let text = std::fs::read_to_string(document).map_err(|_| RenderError::Unreadable {
        path: document.to_path_buf(),
    })?;
    Ok(document_bounds(&text))
}

/// Extent of all drawn items in a board file, in inches.
///
/// Returns `None` when the text does not parse or draws nothing.
#[must_use]
pub fn document_bounds(text: &str) -> Option<BoundingBox> {
    let root = parse(text)?;
    let mut extent = Extent::default();

    for item in root.children() {
        if item.head() == Some("footprint") {
            let placement = Placement::of(item);
            extent.include(placement.origin);
            for child in item.children() {
                include_item(&mut extent, child, placement);
            }
        } else {
            include_item(&mut extent, item, Placement::PAGE);
        }
    }

    extent.bounds()
}

fn include_item(extent: &mut Extent, item: &Sexp, placement: Placement) {
    let Some(head) = item.head() else {
        return;
    };
    let shape = head
        .strip_prefix("gr_")
        .or_else(|| head.strip_prefix("fp_"))
        .unwrap_or(head);
    let at = |name: &str| item.point(name).map(|point| placement.apply(point));

    match shape {
        "line" | "rect" | "segment" => {
            extent.extend([at("start"), at("end")].into_iter().flatten());
        }
        "arc" => match (at("start"), at("mid"), at("end")) {
            (Some(start), Some(mid), Some(end)) => extent.include_arc(start, mid, end),
            (start, mid, end) => extent.extend([start, mid, end].into_iter().flatten()),
        },
        "circle" => {
            if let (Some(center), Some(end)) = (at("center"), at("end")) {
                let radius = (end.0 - center.0).hypot(end.1 - center.1);
                extent.include_disc(center, radius);
            }
        }
        "poly" | "curve" | "zone" => {
            extent.extend(item.polygon().map(|point| placement.apply(point)));
        }
        "via" | "pad" => {
            if let Some(center) = at("at") {
                let radius = item
                    .child("size")
                    .and_then(|size| Some(size.number(1)?.hypot(size.number(2).unwrap_or(0.0))))
                    .map_or(0.0, |diagonal| diagonal / 2.0);
                extent.include_disc(center, radius);
            }
        }
        "text" | "property" => extent.extend(at("at")),
        _ => {}
    }
}

#[derive(Debug, Default)]
struct Extent {
    min: Option<(f64, f64)>,
    max: Option<(f64, f64)>,
}

impl Extent {
    fn include(&mut self, (x, y): (f64, f64)) {
        self.min = Some(self.min.map_or((x, y), |(mx, my)| (mx.min(x), my.min(y))));
        self.max = Some(self.max.map_or((x, y), |(mx, my)| (mx.max(x), my.max(y))));
    }

    fn extend(&mut self, points: impl IntoIterator<Item = (f64, f64)>) {
        for point in points {
            self.include(point);
        }
    }

    fn include_disc(&mut self, (cx, cy): (f64, f64), radius: f64) {
        self.include((cx - radius, cy - radius));
        self.include((cx + radius, cy + radius));
    }

    /// Arc through three points, including every axis extreme it sweeps past.
    fn include_arc(&mut self, start: (f64, f64), mid: (f64, f64), end: (f64, f64)) {
        self.extend([start, mid, end]);
        let Some(center) = circumcenter(start, mid, end) else {
            return;
        };
        let radius = (start.0 - center.0).hypot(start.1 - center.1);
        let angle = |(x, y): (f64, f64)| (y - center.1).atan2(x - center.0);
        let (from, through, to) = (angle(start), angle(mid), angle(end));

        // counter-clockwise distance from the start angle
        let offset = |theta: f64| (theta - from).rem_euclid(TAU);
        let counter_clockwise = offset(through) <= offset(to);
        for quarter in 0_u8..4 {
            let theta = f64::from(quarter) * FRAC_PI_2;
            let swept = if counter_clockwise {
                offset(theta) <= offset(to)
            } else {
                offset(theta) >= offset(to)
            };
            if swept {
                let (sin, cos) = theta.sin_cos();
                self.include((center.0 + radius * cos, center.1 + radius * sin));
            }
        }
    }

    fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_mm_extents(self.min?, self.max?)
    }
}

/// Center of the circle through three points; `None` when they are collinear.
fn circumcenter(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> Option<(f64, f64)> {
    let d = 2.0 * (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1));
    if d.abs() < f64::EPSILON {
        return None;
    }
    let norm = |(x, y): (f64, f64)| x * x + y * y;
    let (a2, b2, c2) = (norm(a), norm(b), norm(c));
    Some((
        (a2 * (b.1 - c.1) + b2 * (c.1 - a.1) + c2 * (a.1 - b.1)) / d,
        (a2 * (c.0 - b.0) + b2 * (a.0 - c.0) + c2 * (b.0 - a.0)) / d,
    ))
}

fn parse(text: &str) -> Option<Sexp> {
    let mut stack: Vec<Vec<Sexp>> = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' => stack.push(Vec::new()),
            ')' => {
                let list = Sexp::List(stack.pop()?);
                match stack.last_mut() {
                    Some(parent) => parent.push(list),
                    None => return Some(list),
                }
            }
            '"' => {
                let mut atom = String::new();
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => atom.extend(chars.next()),
                        '"' => break,
                        other => atom.push(other),
                    }
                }
                stack.last_mut()?.push(Sexp::Atom(atom));
            }
            c if c.is_whitespace() => {}
            first => {
                let mut atom = String::from(first);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                stack.last_mut()?.push(Sexp::Atom(atom));
            }
        }
    }

    None
}
