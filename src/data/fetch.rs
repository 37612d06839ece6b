//! fetch.rs
//!
//! Cache de red vial a nivel de proceso. Es el unico estado global del
//! que depende el nucleo; ciclo de vida explicito init/lookup/set/clear.
//!
//! Clave: (lat 4 decimales, lng 4 decimales, radio). TTL por defecto
//! 10 minutos, configurable en el arranque.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::models::types::NetworkData;

struct RoadCache {
    ttl: Duration,
    map: HashMap<String, (Instant, NetworkData)>,
}

static ROAD_CACHE: Lazy<Mutex<RoadCache>> = Lazy::new(|| {
    Mutex::new(RoadCache {
        ttl: Duration::from_secs(600),
        map: HashMap::new(),
    })
});

pub fn cache_key(lat: f64, lng: f64, radius_km: f64) -> String {
    format!("{:.4},{:.4},{}", lat, lng, radius_km)
}

pub fn init(ttl: Duration) {
    let mut c = ROAD_CACHE.lock().unwrap();
    c.ttl = ttl;
    c.map.clear();
}

pub fn lookup(key: &str) -> Option<NetworkData> {
    let c = ROAD_CACHE.lock().unwrap();
    match c.map.get(key) {
        Some((at, data)) if at.elapsed() < c.ttl => Some(data.clone()),
        _ => None,
    }
}

pub fn set(key: &str, data: NetworkData) {
    let mut c = ROAD_CACHE.lock().unwrap();
    c.map.insert(key.to_string(), (Instant::now(), data));
}

pub fn clear() {
    ROAD_CACHE.lock().unwrap().map.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_respects_ttl() {
        init(Duration::from_secs(60));
        let key = cache_key(40.4168, -3.7038, 3.0);
        assert!(lookup(&key).is_none());
        set(
            &key,
            NetworkData {
                roads: Vec::new(),
                source: "test".into(),
            },
        );
        assert!(lookup(&key).is_some());

        // TTL cero expira de inmediato
        init(Duration::from_secs(0));
        set(&key, NetworkData::default());
        assert!(lookup(&key).is_none());
        clear();
    }
}
