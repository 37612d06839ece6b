//! geoutil.rs
//!
//! Utilidades geodesicas sobre WGS84.
//!
//! - Distancia haversine y rumbo (gran circulo, 0 = norte, horario).
//! - Longitud de polilinea y punto a una distancia dada sobre ella.
//! - Densificacion a paso fijo para interpolar vehiculos con suavidad.
//!
//! Todo trabaja con coordenadas [lng, lat] en grados, interpolacion
//! lineal por tramos. Suficiente a escala urbana.

use crate::models::types::{BBox, Coord};

const EARTH_R_M: f64 = 6_371_000.0;

#[inline]
pub fn haversine_m(a: Coord, b: Coord) -> f64 {
    let dlat = (b[1] - a[1]).to_radians();
    let dlon = (b[0] - a[0]).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a[1].to_radians().cos() * b[1].to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_R_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Rumbo de gran circulo de `a` hacia `b`, en grados [0, 360).
pub fn bearing_deg(a: Coord, b: Coord) -> f64 {
    let phi1 = a[1].to_radians();
    let phi2 = b[1].to_radians();
    let dlon = (b[0] - a[0]).to_radians();
    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    let deg = y.atan2(x).to_degrees();
    (deg + 360.0) % 360.0
}

pub fn polyline_length_m(coords: &[Coord]) -> f64 {
    coords.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

/// Punto a `dist_m` metros del inicio de la polilinea (lineal por
/// tramos). Se recorta a los extremos.
pub fn point_at_distance(coords: &[Coord], dist_m: f64) -> Coord {
    if coords.is_empty() {
        return [0.0, 0.0];
    }
    if coords.len() == 1 || dist_m <= 0.0 {
        return coords[0];
    }
    let mut walked = 0.0;
    for w in coords.windows(2) {
        let seg = haversine_m(w[0], w[1]);
        if seg > 0.0 && walked + seg >= dist_m {
            let t = (dist_m - walked) / seg;
            return [
                w[0][0] + (w[1][0] - w[0][0]) * t,
                w[0][1] + (w[1][1] - w[0][1]) * t,
            ];
        }
        walked += seg;
    }
    *coords.last().unwrap()
}

/// Remuestrea la polilinea a paso fijo `step_m`, conservando los
/// extremos. Con menos de dos puntos devuelve la entrada tal cual.
pub fn densify(coords: &[Coord], step_m: f64) -> Vec<Coord> {
    if coords.len() < 2 || step_m <= 0.0 {
        return coords.to_vec();
    }
    let total = polyline_length_m(coords);
    if total == 0.0 {
        return coords.to_vec();
    }
    let n = (total / step_m).ceil() as usize;
    let mut out = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let d = (i as f64 * step_m).min(total);
        out.push(point_at_distance(coords, d));
    }
    out
}

/// Concatena geometrias por arista descartando el primer punto de cada
/// arista posterior a la primera (coincide con el final de la anterior).
pub fn concat_polylines(parts: &[&[Coord]]) -> Vec<Coord> {
    let mut out: Vec<Coord> = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let skip = usize::from(i > 0 && !part.is_empty());
        out.extend_from_slice(&part[skip.min(part.len())..]);
    }
    out
}

pub fn bbox_area_km2(b: &BBox) -> f64 {
    let mid_lat = (b.min_lat + b.max_lat) / 2.0;
    let width_m = haversine_m([b.min_lng, mid_lat], [b.max_lng, mid_lat]);
    let height_m = haversine_m([b.min_lng, b.min_lat], [b.min_lng, b.max_lat]);
    (width_m / 1000.0) * (height_m / 1000.0)
}
