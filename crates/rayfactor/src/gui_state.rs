use app::anyhow::Result;
use gui::imgui::{Condition, Ui};

pub const MAX_RAY_COUNT: i32 = 5000;

#[derive(Debug, Clone, PartialEq)]
pub struct Gui {
    pub ray_count: i32,
    pub triangle: i32,
    pub line_width: f32,
    pub shade_by_energy: bool,
    pub trace_requested: bool,
    /// Written by the app every frame, bounds the triangle selector.
    pub triangle_count: u32,
    /// Totals of the last reduction, one entry per mesh.
    pub mesh_energy: Vec<f32>,
}

impl app::Gui for Gui {
    fn new() -> Result<Self> {
        Ok(Gui {
            ray_count: 50,
            triangle: 0,
            line_width: 1.0,
            shade_by_energy: true,
            trace_requested: false,
            triangle_count: 0,
            mesh_energy: vec![],
        })
    }

    fn build(&mut self, ui: &Ui) {
        ui.window("Ray factor")
            .size([300.0, 280.0], Condition::FirstUseEver)
            .build(|| {
                ui.slider("Rays", 0, MAX_RAY_COUNT, &mut self.ray_count);

                let last_triangle = self.triangle_count.saturating_sub(1) as i32;
                ui.slider("Triangle", 0, last_triangle, &mut self.triangle);

                ui.slider("Line width", 0.2, 10.0, &mut self.line_width);
                ui.checkbox("Shade by energy", &mut self.shade_by_energy);

                if ui.button("Trace") {
                    self.trace_requested = true;
                }

                ui.separator();
                ui.text("Energy per mesh");
                for (mesh, energy) in self.mesh_energy.iter().enumerate() {
                    ui.label_text(format!("mesh {mesh}"), format!("{energy:.4}"));
                }
            });
    }
}
