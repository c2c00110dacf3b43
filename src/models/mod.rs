//! Built-in demonstration models and helpers for writing new ones.

mod parameter_names;
mod rosenbrock;
mod spike_slab;
mod straight_line;
mod uniform;

pub use self::parameter_names::ParameterNames;
pub use self::rosenbrock::Rosenbrock;
pub use self::spike_slab::SpikeSlab;
pub use self::straight_line::StraightLine;
pub use self::uniform::UniformCoords;
