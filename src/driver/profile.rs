use std::collections::HashMap;

use serde_json::Value;

/// G-code prologue/epilogue plus environment variables produced from a
/// profile for a given material/temperature configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaffold {
    pub start_lines: Vec<String>,
    pub end_lines: Vec<String>,
    pub variables: HashMap<String, Value>,
}

/// Opaque device description: platform geometry, capability flags, and a
/// matching predicate over `(vid, pid)`. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub xsize: f64,
    pub ysize: f64,
    pub zsize: f64,
    pub can_print: bool,
    pub can_print_to_file: bool,
    pub has_heated_platform: bool,
    pub number_of_tools: usize,
    vid_pid_pairs: Vec<(u16, u16)>,
}

impl Profile {
    pub fn new(
        name: impl Into<String>,
        xsize: f64,
        ysize: f64,
        zsize: f64,
        can_print: bool,
        can_print_to_file: bool,
        has_heated_platform: bool,
        number_of_tools: usize,
        vid_pid_pairs: Vec<(u16, u16)>,
    ) -> Self {
        Self {
            name: name.into(),
            xsize,
            ysize,
            zsize,
            can_print,
            can_print_to_file,
            has_heated_platform,
            number_of_tools,
            vid_pid_pairs,
        }
    }

    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid_pid_pairs.iter().any(|&(v, p)| v == vid && p == pid)
    }

    /// Builds the G-code scaffold for this profile at a given temperature and
    /// material configuration. `extruders` selects which toolheads are
    /// seeded into the start/end lines and the `environment` substitution
    /// map the parser reads.
    pub fn get_gcode_scaffold(
        &self,
        extruders: &[usize],
        ext_temp: f64,
        platform_temp: f64,
        material: &str,
    ) -> Scaffold {
        let mut variables = HashMap::new();
        variables.insert("profile_name".into(), Value::String(self.name.clone()));
        variables.insert("material".into(), Value::String(material.into()));
        variables.insert("extruder_temperature".into(), serde_json::json!(ext_temp));
        variables.insert("platform_temperature".into(), serde_json::json!(platform_temp));

        let mut start_lines = Vec::new();
        for &tool in extruders {
            start_lines.push(format!("M104 T{tool} S{ext_temp}"));
        }
        if self.has_heated_platform {
            start_lines.push(format!("M109 S{platform_temp}"));
        }
        start_lines.push("G28".to_string());

        let mut end_lines = Vec::new();
        for &tool in extruders {
            end_lines.push(format!("M104 T{tool} S0"));
        }
        if self.has_heated_platform {
            end_lines.push("M140 S0".to_string());
        }
        end_lines.push("M84".to_string());

        Scaffold {
            start_lines,
            end_lines,
            variables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> Profile {
        Profile::new(
            "Replicator",
            225.0,
            145.0,
            150.0,
            true,
            true,
            true,
            2,
            vec![(0x23c1, 0xb015)],
        )
    }

    #[test]
    fn matches_only_known_vid_pid_pairs() {
        let profile = sample_profile();
        assert!(profile.matches(0x23c1, 0xb015));
        assert!(!profile.matches(0x0000, 0x0000));
    }

    #[test]
    fn scaffold_includes_heated_platform_lines_when_capable() {
        let profile = sample_profile();
        let scaffold = profile.get_gcode_scaffold(&[0, 1], 230.0, 110.0, "PLA");
        assert!(scaffold.start_lines.iter().any(|l| l.starts_with("M109")));
        assert!(scaffold.end_lines.iter().any(|l| l.starts_with("M140")));
        assert_eq!(scaffold.variables["material"], Value::String("PLA".into()));
    }

    #[test]
    fn scaffold_omits_platform_lines_without_heated_platform() {
        let mut profile = sample_profile();
        profile.has_heated_platform = false;
        let scaffold = profile.get_gcode_scaffold(&[0], 200.0, 0.0, "PLA");
        assert!(!scaffold.start_lines.iter().any(|l| l.starts_with("M109")));
        assert!(!scaffold.end_lines.iter().any(|l| l.starts_with("M140")));
    }
}
