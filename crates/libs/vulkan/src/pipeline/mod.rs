mod compute;
mod graphics;
mod layout;
mod shader;

pub use compute::*;
pub use graphics::*;
pub use layout::*;
pub use shader::*;
