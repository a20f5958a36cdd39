//! ds9 region files (image/physical coordinates only).
//!
//! Supported shapes: `circle`, `ellipse`, `box`, `annulus`, `polygon`. A leading
//! `-` marks an exclusion. The noticed area is the union of all included
//! shapes (the whole image if there are none) minus the union of all
//! excluded shapes.
//!
//! Angles are in degrees, counter-clockwise from the x axis. Box sizes are full
//! widths. Sky coordinate systems are rejected: there is no WCS support.

use std::fs;
use std::path::Path;

use crate::domain::{Image, PhysicalTransform};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionCoord {
    Image,
    Physical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle { x: f64, y: f64, r: f64 },
    Ellipse { x: f64, y: f64, rx: f64, ry: f64, angle: f64 },
    Box { x: f64, y: f64, w: f64, h: f64, angle: f64 },
    Annulus { x: f64, y: f64, r_in: f64, r_out: f64 },
    Polygon(Vec<(f64, f64)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionShape {
    pub shape: Shape,
    pub include: bool,
    pub coord: RegionCoord,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Region {
    pub shapes: Vec<RegionShape>,
}

const SKY_SYSTEMS: [&str; 9] = [
    "fk4", "fk5", "icrs", "galactic", "ecliptic", "wcs", "linear", "amplifier", "detector",
];

pub fn read_region(path: &Path) -> Result<Region, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::input(format!("Failed to read region file '{}': {e}", path.display())))?;
    Region::parse(&text).map_err(|e| AppError::input(format!("Invalid region file '{}': {e}", path.display())))
}

impl Region {
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let mut coord = RegionCoord::Physical;
        let mut shapes = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("");
            for item in line.split(';') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let lower = item.to_ascii_lowercase();
                if lower.starts_with("global") {
                    continue;
                }
                match lower.as_str() {
                    "image" => {
                        coord = RegionCoord::Image;
                        continue;
                    }
                    "physical" => {
                        coord = RegionCoord::Physical;
                        continue;
                    }
                    sys if SKY_SYSTEMS.contains(&sys) => {
                        return Err(AppError::input(format!(
                            "line {}: coordinate system '{sys}' is not supported (use image or physical)",
                            lineno + 1
                        )));
                    }
                    _ => {}
                }

                let shape = parse_shape(&lower, coord)
                    .map_err(|e| AppError::input(format!("line {}: {}", lineno + 1, e.message())))?;
                shapes.push(shape);
            }
        }

        Ok(Self { shapes })
    }

    /// Whether the point given in logical (image) coordinates is noticed.
    pub fn contains(&self, x: f64, y: f64, transform: &PhysicalTransform) -> bool {
        let (px, py) = transform.to_physical(x, y);
        let hit = |s: &RegionShape| match s.coord {
            RegionCoord::Image => s.shape.contains(x, y),
            RegionCoord::Physical => s.shape.contains(px, py),
        };

        let mut includes = self.shapes.iter().filter(|s| s.include).peekable();
        let included = if includes.peek().is_none() {
            true
        } else {
            includes.any(hit)
        };
        included && !self.shapes.iter().filter(|s| !s.include).any(hit)
    }

    /// Noticed flag for every pixel of the image.
    pub fn mask(&self, image: &Image) -> Vec<bool> {
        (0..image.len())
            .map(|idx| {
                let (x, y) = image.logical_coords(idx);
                self.contains(x, y, &image.transform)
            })
            .collect()
    }
}

fn parse_shape(item: &str, coord: RegionCoord) -> Result<RegionShape, AppError> {
    let (include, body) = match item.strip_prefix('-') {
        Some(rest) => (false, rest.trim_start()),
        None => (true, item.strip_prefix('+').unwrap_or(item).trim_start()),
    };

    let open = body
        .find('(')
        .ok_or_else(|| AppError::input(format!("cannot parse region item '{item}'")))?;
    let close = body
        .rfind(')')
        .filter(|&c| c > open)
        .ok_or_else(|| AppError::input(format!("missing ')' in region item '{item}'")))?;
    let name = body[..open].trim();
    let args: Vec<f64> = body[open + 1..close]
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| AppError::input(format!("bad number '{s}' in '{item}'")))
        })
        .collect::<Result<_, _>>()?;

    let need = |n: usize| -> Result<(), AppError> {
        if args.len() < n {
            Err(AppError::input(format!("'{name}' needs at least {n} values in '{item}'")))
        } else {
            Ok(())
        }
    };

    let shape = match name {
        "circle" => {
            need(3)?;
            Shape::Circle {
                x: args[0],
                y: args[1],
                r: args[2],
            }
        }
        "ellipse" => {
            need(4)?;
            Shape::Ellipse {
                x: args[0],
                y: args[1],
                rx: args[2],
                ry: args[3],
                angle: args.get(4).copied().unwrap_or(0.0),
            }
        }
        "box" | "rotbox" => {
            need(4)?;
            Shape::Box {
                x: args[0],
                y: args[1],
                w: args[2],
                h: args[3],
                angle: args.get(4).copied().unwrap_or(0.0),
            }
        }
        "annulus" => {
            need(4)?;
            Shape::Annulus {
                x: args[0],
                y: args[1],
                r_in: args[2],
                r_out: args[args.len() - 1],
            }
        }
        "polygon" => {
            if args.len() < 6 || args.len() % 2 != 0 {
                return Err(AppError::input(format!(
                    "'polygon' needs an even number (>= 6) of values in '{item}'"
                )));
            }
            Shape::Polygon(args.chunks_exact(2).map(|p| (p[0], p[1])).collect())
        }
        other => return Err(AppError::input(format!("unsupported region shape '{other}'"))),
    };

    Ok(RegionShape { shape, include, coord })
}

impl Shape {
    pub fn contains(&self, px: f64, py: f64) -> bool {
        match self {
            Shape::Circle { x, y, r } => {
                let (dx, dy) = (px - x, py - y);
                dx * dx + dy * dy <= r * r
            }
            Shape::Ellipse { x, y, rx, ry, angle } => {
                let (u, v) = rotate_into(px - x, py - y, *angle);
                (u / rx).powi(2) + (v / ry).powi(2) <= 1.0
            }
            Shape::Box { x, y, w, h, angle } => {
                let (u, v) = rotate_into(px - x, py - y, *angle);
                u.abs() <= w / 2.0 && v.abs() <= h / 2.0
            }
            Shape::Annulus { x, y, r_in, r_out } => {
                let (dx, dy) = (px - x, py - y);
                let d2 = dx * dx + dy * dy;
                d2 >= r_in * r_in && d2 <= r_out * r_out
            }
            Shape::Polygon(vertices) => point_in_polygon(px, py, vertices),
        }
    }
}

/// Express `(dx, dy)` in the frame of a shape rotated by `angle_deg`.
fn rotate_into(dx: f64, dy: f64, angle_deg: f64) -> (f64, f64) {
    let (s, c) = angle_deg.to_radians().sin_cos();
    (dx * c + dy * s, -dx * s + dy * c)
}

/// Even-odd ray casting.
fn point_in_polygon(px: f64, py: f64, vertices: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}
