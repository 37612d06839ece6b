//! Errores tipados del nucleo de simulacion.

/// Fallos que pueden cruzar la frontera del orquestador. Los proveedores
/// degradan internamente y nunca propagan `ProviderUnavailable` hacia
/// fuera; se emite como evento `status` en el stream.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("No markers placed for simulation")]
    EmptyInput,

    #[error("upstream provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("road graph has no edges")]
    GraphEmpty,

    #[error("simulation aborted")]
    SimulationAborted,

    #[error("invalid marker: {0}")]
    InvalidMarker(String),
}
