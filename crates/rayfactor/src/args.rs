use clap::Parser;

/// Interactive view factor explorer for triangle meshes
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Path of the OBJ file to trace
    #[clap(
        short,
        long,
        value_parser,
        default_value = "crates/rayfactor/models/two_plates.obj"
    )]
    pub model: String,

    /// Window width in pixels
    #[clap(long, value_parser, default_value_t = 1280)]
    pub width: u32,

    /// Window height in pixels
    #[clap(long, value_parser, default_value_t = 720)]
    pub height: u32,

    /// Ray count of the startup trace
    #[clap(short, long, value_parser, default_value_t = 50)]
    pub rays: u32,
}
