use crate::tally::*;

use precinct_tally::identity::{IdentityIndex, PrecinctFeature};

/// A GeoJSON feature collection of precincts. The document is kept as is so
/// that it can be written back with only the name property changed.
#[derive(Debug, Clone)]
pub struct BoundaryFile {
    document: JSValue,
    settings: BoundarySettings,
}

fn property_text(v: Option<&JSValue>) -> String {
    match v {
        Some(JSValue::String(s)) => s.trim().to_string(),
        Some(JSValue::Number(n)) => n.to_string(),
        _ => "".to_string(),
    }
}

impl BoundaryFile {
    pub fn read(settings: &BoundarySettings) -> BTallyResult<BoundaryFile> {
        let path = settings.file_path.as_str();
        let text = read_text(Path::new(path))?;
        let document: JSValue = serde_json::from_str(&text).context(ParsingJsonSnafu { path })?;
        if !document["features"].is_array() {
            return InvalidBoundariesSnafu { path }.fail().map_err(Box::new);
        }
        let res = BoundaryFile {
            document,
            settings: settings.clone(),
        };
        info!(
            "BoundaryFile::read: {}: {} features",
            simplify_file_name(path),
            res.feature_values().len()
        );
        Ok(res)
    }

    fn feature_values(&self) -> &[JSValue] {
        self.document["features"]
            .as_array()
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn features(&self) -> Vec<PrecinctFeature> {
        self.feature_values()
            .iter()
            .map(|f| {
                let props = &f["properties"];
                PrecinctFeature {
                    county: property_text(props.get(self.settings.county_property())),
                    code: property_text(props.get(self.settings.code_property())),
                    name: property_text(props.get(self.settings.name_property())),
                }
            })
            .collect()
    }

    /// Sets the name property of every feature to its canonical name.
    /// Returns the number of features changed.
    pub fn apply_names(&mut self, index: &IdentityIndex) -> usize {
        let county_p = self.settings.county_property().to_string();
        let code_p = self.settings.code_property().to_string();
        let name_p = self.settings.name_property().to_string();
        let mut changed = 0;
        let features = match self.document.get_mut("features").and_then(|f| f.as_array_mut()) {
            Some(features) => features,
            None => return 0,
        };
        for f in features.iter_mut() {
            let county = property_text(f["properties"].get(&county_p));
            let code = property_text(f["properties"].get(&code_p));
            let current = property_text(f["properties"].get(&name_p));
            let name = match index.canonical_name(&county, &code) {
                Some(name) if name != current => name,
                _ => continue,
            };
            if let Some(props) = f.get_mut("properties").and_then(|p| p.as_object_mut()) {
                debug!("apply_names: {}/{}: {:?} -> {:?}", county, code, current, name);
                props.insert(name_p.clone(), json!(name));
                changed += 1;
            }
        }
        info!("apply_names: {} features renamed", changed);
        changed
    }

    pub fn write(&self, path: &Path) -> BTallyResult<()> {
        let contents = serde_json::to_string(&self.document).context(SerializingJsonSnafu {})?;
        write_text(path, &contents)
    }
}
