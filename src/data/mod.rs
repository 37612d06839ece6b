pub mod fetch;
pub mod osm;
pub mod poblacion;
pub mod trafico;
