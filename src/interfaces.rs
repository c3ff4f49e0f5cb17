//! Collaborators around the load flow: network import, export and
//! diagram rendering. Only the interfaces live here.

use std::path::Path;

use crate::network::Network;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOptions {
    /// Merge boundary files into the imported network.
    pub convert_boundary: bool,
}

/// Builds a network from an exchange format archive.
pub trait NetworkLoader {
    fn load(&self, archive: &Path, options: &ImportOptions) -> anyhow::Result<Network>;
}

/// Writes a network and its load flow results.
pub trait NetworkWriter {
    fn write(&self, network: &Network, format: &str, destination: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvgParameters {
    /// Fixed height of the drawing in pixels, or automatic.
    pub fixed_height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutParameters {
    pub spring_repulsion_factor: f64,
}

pub trait DiagramRenderer {
    /// Single line diagram of one voltage level.
    fn draw_single_line(
        &self,
        network: &Network,
        voltage_level: &str,
        destination: &Path,
    ) -> anyhow::Result<()>;

    /// Diagram of the whole network.
    fn draw_area(
        &self,
        network: &Network,
        svg: &SvgParameters,
        layout: &LayoutParameters,
        destination: &Path,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use anyhow::format_err;

    use super::*;
    use crate::cases::case9;
    use crate::params::LoadFlowParameters;
    use crate::runpf::run_load_flow;

    struct BundledLoader;

    impl NetworkLoader for BundledLoader {
        fn load(&self, archive: &Path, options: &ImportOptions) -> anyhow::Result<Network> {
            if options.convert_boundary {
                return Err(format_err!("no boundary in {}", archive.display()));
            }
            Ok(case9())
        }
    }

    #[derive(Default)]
    struct Recorder {
        written: RefCell<Vec<(String, PathBuf, usize)>>,
    }

    impl NetworkWriter for Recorder {
        fn write(&self, network: &Network, format: &str, destination: &Path) -> anyhow::Result<()> {
            let solved = network.buses.iter().filter(|b| b.mode.is_some()).count();
            self.written
                .borrow_mut()
                .push((format.to_string(), destination.to_path_buf(), solved));
            Ok(())
        }
    }

    impl DiagramRenderer for Recorder {
        fn draw_single_line(
            &self,
            network: &Network,
            voltage_level: &str,
            destination: &Path,
        ) -> anyhow::Result<()> {
            network
                .bus(voltage_level)
                .ok_or_else(|| format_err!("unknown voltage level {}", voltage_level))?;
            self.write(network, "svg", destination)
        }

        fn draw_area(
            &self,
            network: &Network,
            svg: &SvgParameters,
            layout: &LayoutParameters,
            destination: &Path,
        ) -> anyhow::Result<()> {
            if svg.fixed_height == Some(0) || layout.spring_repulsion_factor < 0.0 {
                return Err(format_err!("invalid drawing parameters"));
            }
            self.write(network, "svg", destination)
        }
    }

    #[test]
    fn load_solve_write_and_draw() -> anyhow::Result<()> {
        let loader = BundledLoader;
        let mut network = loader.load(Path::new("case9.zip"), &ImportOptions::default())?;
        assert!(loader
            .load(
                Path::new("case9.zip"),
                &ImportOptions {
                    convert_boundary: true
                }
            )
            .is_err());

        let result = run_load_flow(&mut network, &LoadFlowParameters::default())?;
        if !result.is_ok() {
            return Err(format_err!("load flow failed: {}", result.status()));
        }

        let recorder = Recorder::default();
        recorder.write(&network, "XIIDM", Path::new("out.xiidm"))?;
        recorder.draw_single_line(&network, "5", Path::new("vl5.svg"))?;
        recorder.draw_area(
            &network,
            &SvgParameters {
                fixed_height: Some(1000),
            },
            &LayoutParameters {
                spring_repulsion_factor: 0.0,
            },
            Path::new("area.svg"),
        )?;
        assert!(recorder
            .draw_single_line(&network, "unknown", Path::new("x.svg"))
            .is_err());

        let written = recorder.written.borrow();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0].0, "XIIDM");
        assert_eq!(written[0].2, network.buses.len());
        Ok(())
    }
}
