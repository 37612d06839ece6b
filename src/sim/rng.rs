//! RNG determinista de la simulacion.
//!
//! Todo lo estocastico (salidas, destinos, paseos de ruta, varianza de
//! metricas) pasa por un unico `ChaCha8Rng` sembrable que posee el
//! orquestador: misma semilla, misma ejecucion.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub struct SimRng(pub ChaCha8Rng);

impl SimRng {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Self(ChaCha8Rng::seed_from_u64(s)),
            None => Self(ChaCha8Rng::from_entropy()),
        }
    }

    pub fn from_seed_u64(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }
}
