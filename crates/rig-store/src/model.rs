use std::collections::BTreeMap;

use rig_core::{
    CameraId, CameraLink, DisplayPosition, ModelError, PortNumber, Rotation, ServerStatus,
    SessionMessage, TestReport, CAMERA_COUNT, PORT_COUNT,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Operator-facing settings of one serial channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub port_number: PortNumber,
    #[serde(default)]
    pub selected_device_path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub connected: bool,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl PortConfig {
    pub fn empty(port_number: PortNumber) -> Self {
        Self {
            port_number,
            selected_device_path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            connected: false,
        }
    }

    pub fn has_device(&self) -> bool {
        !self.selected_device_path.trim().is_empty()
    }
}

/// All four port configs. Persisted as a JSON array ordered by port number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PortConfig>", into = "Vec<PortConfig>")]
pub struct PortConfigs([PortConfig; PORT_COUNT]);

impl PortConfigs {
    pub fn get(&self, port: PortNumber) -> &PortConfig {
        &self.0[port.index()]
    }

    pub fn get_mut(&mut self, port: PortNumber) -> &mut PortConfig {
        &mut self.0[port.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortConfig> {
        self.0.iter()
    }
}

impl Default for PortConfigs {
    fn default() -> Self {
        Self(PortNumber::table(PortConfig::empty))
    }
}

impl TryFrom<Vec<PortConfig>> for PortConfigs {
    type Error = ModelError;

    fn try_from(configs: Vec<PortConfig>) -> Result<Self, Self::Error> {
        let mut slots: [Option<PortConfig>; PORT_COUNT] = Default::default();
        for config in configs {
            let index = config.port_number.index();
            slots[index] = Some(config);
        }
        // Ports the stored array forgot come back empty rather than failing the load.
        Ok(Self(PortNumber::table(|port| {
            slots[port.index()]
                .take()
                .unwrap_or_else(|| PortConfig::empty(port))
        })))
    }
}

impl From<PortConfigs> for Vec<PortConfig> {
    fn from(configs: PortConfigs) -> Self {
        configs.0.into()
    }
}

/// Which camera is rendered at each display position. Always a permutation
/// of the four camera ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, i64>", into = "BTreeMap<String, u8>")]
pub struct CameraLayout([CameraId; CAMERA_COUNT]);

impl CameraLayout {
    /// Position 1 shows camera 0, position 2 shows camera 1, and so on.
    pub fn identity() -> Self {
        Self(CameraId::table(|camera| camera))
    }

    pub fn from_cameras(cameras: [CameraId; CAMERA_COUNT]) -> Result<Self, ModelError> {
        let mut seen = [false; CAMERA_COUNT];
        for camera in cameras {
            if std::mem::replace(&mut seen[camera.index()], true) {
                let listed: Vec<String> = cameras.iter().map(ToString::to_string).collect();
                return Err(ModelError::NotAPermutation(format!(
                    "camera {camera} appears twice in [{}]",
                    listed.join(", ")
                )));
            }
        }
        Ok(Self(cameras))
    }

    pub fn camera_at(&self, position: DisplayPosition) -> CameraId {
        self.0[position.index()]
    }

    pub fn position_of(&self, camera: CameraId) -> Option<DisplayPosition> {
        DisplayPosition::all().find(|position| self.camera_at(*position) == camera)
    }

    pub fn cameras(&self) -> [CameraId; CAMERA_COUNT] {
        self.0
    }

    /// Exchanges the cameras at two positions. The result is still a
    /// permutation, so a reader can never observe a duplicated camera.
    pub fn swap(&mut self, a: DisplayPosition, b: DisplayPosition) {
        self.0.swap(a.index(), b.index());
    }
}

impl Default for CameraLayout {
    fn default() -> Self {
        Self::identity()
    }
}

impl TryFrom<BTreeMap<String, i64>> for CameraLayout {
    type Error = ModelError;

    fn try_from(raw: BTreeMap<String, i64>) -> Result<Self, Self::Error> {
        let mut cameras: [Option<CameraId>; CAMERA_COUNT] = [None; CAMERA_COUNT];
        for (key, camera) in raw {
            let position: DisplayPosition = key.parse()?;
            cameras[position.index()] = Some(CameraId::new(camera)?);
        }
        let mut resolved = CameraId::table(|camera| camera);
        for position in DisplayPosition::all() {
            resolved[position.index()] = cameras[position.index()].ok_or_else(|| {
                ModelError::NotAPermutation(format!("display position {position} has no camera"))
            })?;
        }
        Self::from_cameras(resolved)
    }
}

impl From<CameraLayout> for BTreeMap<String, u8> {
    fn from(layout: CameraLayout) -> Self {
        DisplayPosition::all()
            .map(|position| (position.to_string(), layout.camera_at(position).get()))
            .collect()
    }
}

/// Rotation of each physical camera, keyed by camera id so it stays with
/// the camera wherever it is displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, i64>", into = "BTreeMap<String, u16>")]
pub struct CameraRotations([Rotation; CAMERA_COUNT]);

impl CameraRotations {
    pub fn get(&self, camera: CameraId) -> Rotation {
        self.0[camera.index()]
    }

    pub fn set(&mut self, camera: CameraId, rotation: Rotation) {
        self.0[camera.index()] = rotation;
    }

    pub fn advance(&mut self, camera: CameraId) -> Rotation {
        let next = self.get(camera).advance();
        self.set(camera, next);
        next
    }
}

impl TryFrom<BTreeMap<String, i64>> for CameraRotations {
    type Error = ModelError;

    fn try_from(raw: BTreeMap<String, i64>) -> Result<Self, Self::Error> {
        let mut rotations = Self::default();
        for (key, degrees) in raw {
            let camera: CameraId = key.parse()?;
            rotations.set(camera, Rotation::try_from(degrees)?);
        }
        Ok(rotations)
    }
}

impl From<CameraRotations> for BTreeMap<String, u16> {
    fn from(rotations: CameraRotations) -> Self {
        CameraId::all()
            .map(|camera| (camera.to_string(), rotations.get(camera).degrees()))
            .collect()
    }
}

/// Derived view of one display position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSlot {
    pub display_position: DisplayPosition,
    pub camera_id: CameraId,
    pub rotation: Rotation,
}

/// Durable collections as last read from storage. `None` means the key was
/// absent or unreadable and the current value should be kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub ports: Option<PortConfigs>,
    pub layout: Option<CameraLayout>,
    pub rotations: Option<CameraRotations>,
}

/// Everything a presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleSnapshot {
    pub ports: PortConfigs,
    pub layout: CameraLayout,
    pub rotations: CameraRotations,
    pub report: Option<TestReport>,
    pub message: Option<SessionMessage>,
    pub server_status: ServerStatus,
    pub camera_links: [CameraLink; CAMERA_COUNT],
}

impl ConsoleSnapshot {
    pub fn slots(&self) -> [CameraSlot; CAMERA_COUNT] {
        DisplayPosition::table(|display_position| {
            let camera_id = self.layout.camera_at(display_position);
            CameraSlot {
                display_position,
                camera_id,
                rotation: self.rotations.get(camera_id),
            }
        })
    }

    pub fn camera_link(&self, camera: CameraId) -> CameraLink {
        self.camera_links[camera.index()]
    }
}
