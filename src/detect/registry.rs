use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::{GestureDetector, ViolenceDetector};
use super::backends::{
    MotionViolenceDetector, SkinToneGestureDetector, StubGestureDetector, StubViolenceDetector,
};
use crate::config::DetectorSettings;
use crate::region::Region;

/// Builds one gesture detector per detection task.
pub type GestureFactory = Arc<dyn Fn(&Region) -> Result<Box<dyn GestureDetector>> + Send + Sync>;

/// Builds one violence detector per detection task.
pub type ViolenceFactory = Arc<dyn Fn(&Region) -> Result<Box<dyn ViolenceDetector>> + Send + Sync>;

/// Named detector factories.
///
/// Detectors carry per-task state and take `&mut self`, so the registry hands
/// out factories rather than shared instances: every task owns its detector.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    gesture: HashMap<String, GestureFactory>,
    violence: HashMap<String, ViolenceFactory>,
    default_gesture: Option<String>,
    default_violence: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend, defaults taken from `settings`.
    pub fn with_builtin(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();

        let coverage = settings.skin_min_coverage;
        registry.register_gesture("skin", move |_| {
            Ok(Box::new(SkinToneGestureDetector::new(coverage)) as Box<dyn GestureDetector>)
        });
        registry.register_gesture("stub", |_| {
            Ok(Box::new(StubGestureDetector::default()) as Box<dyn GestureDetector>)
        });

        let (threshold, cooldown) = (settings.motion_threshold, settings.incident_cooldown);
        registry.register_violence("motion", move |_| {
            let detector = MotionViolenceDetector::new(threshold).with_cooldown(cooldown);
            Ok(Box::new(detector) as Box<dyn ViolenceDetector>)
        });
        registry.register_violence("stub", |_| {
            Ok(Box::new(StubViolenceDetector::new()) as Box<dyn ViolenceDetector>)
        });

        #[cfg(feature = "backend-tract")]
        {
            if let Some(model_path) = settings.gesture_model.clone() {
                let (width, height) = (settings.input_width, settings.input_height);
                let confidence = settings.gesture_threshold;
                registry.register_gesture("tract", move |_| {
                    let detector =
                        super::backends::TractGestureDetector::new(&model_path, width, height)?
                            .with_threshold(confidence);
                    Ok(Box::new(detector) as Box<dyn GestureDetector>)
                });
            }
        }

        registry.set_default_gesture(&settings.gesture)?;
        registry.set_default_violence(&settings.violence)?;
        Ok(registry)
    }

    /// Register a gesture factory. The first registered becomes the default.
    pub fn register_gesture<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Region) -> Result<Box<dyn GestureDetector>> + Send + Sync + 'static,
    {
        if self.default_gesture.is_none() {
            self.default_gesture = Some(name.to_string());
        }
        self.gesture.insert(name.to_string(), Arc::new(factory));
    }

    /// Register a violence factory. The first registered becomes the default.
    pub fn register_violence<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Region) -> Result<Box<dyn ViolenceDetector>> + Send + Sync + 'static,
    {
        if self.default_violence.is_none() {
            self.default_violence = Some(name.to_string());
        }
        self.violence.insert(name.to_string(), Arc::new(factory));
    }

    pub fn set_default_gesture(&mut self, name: &str) -> Result<()> {
        if !self.gesture.contains_key(name) {
            return Err(anyhow!("gesture backend '{}' not registered", name));
        }
        self.default_gesture = Some(name.to_string());
        Ok(())
    }

    pub fn set_default_violence(&mut self, name: &str) -> Result<()> {
        if !self.violence.contains_key(name) {
            return Err(anyhow!("violence backend '{}' not registered", name));
        }
        self.default_violence = Some(name.to_string());
        Ok(())
    }

    /// Build the default gesture detector for `region`.
    pub fn build_gesture(&self, region: &Region) -> Result<Box<dyn GestureDetector>> {
        let name = self
            .default_gesture
            .as_ref()
            .ok_or_else(|| anyhow!("no gesture backend registered"))?;
        let factory = self
            .gesture
            .get(name)
            .ok_or_else(|| anyhow!("gesture backend '{}' not registered", name))?;
        factory(region)
    }

    /// Build the default violence detector for `region`.
    pub fn build_violence(&self, region: &Region) -> Result<Box<dyn ViolenceDetector>> {
        let name = self
            .default_violence
            .as_ref()
            .ok_or_else(|| anyhow!("no violence backend registered"))?;
        let factory = self
            .violence
            .get(name)
            .ok_or_else(|| anyhow!("violence backend '{}' not registered", name))?;
        factory(region)
    }

    /// Registered gesture backends, sorted.
    pub fn gesture_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gesture.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered violence backends, sorted.
    pub fn violence_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.violence.keys().cloned().collect();
        names.sort();
        names
    }
}
