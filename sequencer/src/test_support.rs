//! Scripted fakes of every device port, shared by the unit tests

use crate::device_ops::*;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use skyflat_imaging::{write_fits, FitsHeader, ImageData};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) fn write_flat(path: &Path, level: u16) {
    let image = ImageData::from_u16(8, 8, 1, &[level; 64]);
    write_fits(path, &image, &FitsHeader::new()).unwrap();
}

/// FITS header claiming a 4e9 x 4e9 x 4e9 cube, with no data behind it
pub(crate) fn write_oversized_header(path: &Path) {
    let cards = [
        ("SIMPLE", "T"),
        ("BITPIX", "16"),
        ("NAXIS", "3"),
        ("NAXIS1", "4000000000"),
        ("NAXIS2", "4000000000"),
        ("NAXIS3", "4000000000"),
    ];
    let mut bytes: Vec<u8> = cards
        .iter()
        .flat_map(|(keyword, value)| format!("{:<8}= {:>20}{:50}", keyword, value, "").into_bytes())
        .collect();
    bytes.extend(format!("{:<80}", "END").into_bytes());
    bytes.resize(2880, b' ');
    std::fs::write(path, bytes).unwrap();
}

/// Pops the next value, repeating the last one forever
fn next_scripted<T: Copy>(queue: &Mutex<VecDeque<T>>) -> T {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front().unwrap()
    } else {
        *queue.front().unwrap()
    }
}

// =========================================================================
// SITE
// =========================================================================

/// Returns scripted altitudes from `sun_altitude()`. Predictions extrapolate
/// linearly from the last returned value at `drift` degrees per second.
pub(crate) struct ScriptedSite {
    altitudes: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    drift: f64,
    ut: DateTime<Utc>,
    polls: AtomicUsize,
}

impl ScriptedSite {
    pub fn new(altitudes: &[f64]) -> Self {
        assert!(!altitudes.is_empty());
        Self {
            altitudes: Mutex::new(altitudes.iter().copied().collect()),
            last: Mutex::new(altitudes[0]),
            drift: 0.0,
            ut: Utc.with_ymd_and_hms(2024, 3, 9, 23, 0, 0).unwrap(),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_drift(mut self, degrees_per_second: f64) -> Self {
        self.drift = degrees_per_second;
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl SiteOps for ScriptedSite {
    fn ut(&self) -> DateTime<Utc> {
        self.ut
    }

    fn sun_altitude(&self) -> f64 {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let altitude = next_scripted(&self.altitudes);
        *self.last.lock().unwrap() = altitude;
        altitude
    }

    fn sun_altitude_at(&self, time: DateTime<Utc>) -> f64 {
        let seconds = (time - self.ut).num_milliseconds() as f64 / 1000.0;
        *self.last.lock().unwrap() + self.drift * seconds
    }
}

// =========================================================================
// TELESCOPE
// =========================================================================

#[derive(Default)]
pub(crate) struct RecordingTelescope {
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
    cancel_on_stop_tracking: Mutex<Option<Arc<AtomicBool>>>,
}

impl RecordingTelescope {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Raise `token` when tracking is stopped, i.e. once the session parks
    pub fn cancel_on_stop_tracking(&self, token: Arc<AtomicBool>) {
        *self.cancel_on_stop_tracking.lock().unwrap() = Some(token);
    }

    fn record(&self, call: String) -> DeviceResult<()> {
        self.calls.lock().unwrap().push(call.clone());
        if self.fail.load(Ordering::SeqCst) {
            Err(format!("{} failed: mount not responding", call))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelescopeOps for RecordingTelescope {
    async fn slew_to_alt_az(&self, altitude: f64, azimuth: f64) -> DeviceResult<()> {
        self.record(format!("slew {} {}", altitude, azimuth))
    }

    async fn stop_tracking(&self) -> DeviceResult<()> {
        if let Some(token) = self.cancel_on_stop_tracking.lock().unwrap().as_ref() {
            token.store(true, Ordering::Relaxed);
        }
        self.record("stop_tracking".to_string())
    }

    async fn start_tracking(&self) -> DeviceResult<()> {
        self.record("start_tracking".to_string())
    }

    async fn set_side_of_pier(&self, side: PierSide) -> DeviceResult<()> {
        self.record(format!("side_of_pier {:?}", side))
    }
}

// =========================================================================
// CAMERA
// =========================================================================

enum CameraMode {
    /// Writes a FITS file at the scripted level next to the camera
    Local,
    /// Reports a Windows path on another host, writes nothing
    Remote,
    Empty,
    Failing(String),
    /// Writes a file that is not FITS
    Garbage,
    /// Writes a FITS header whose axes multiply past `usize`
    Oversized,
}

pub(crate) struct FakeCamera {
    mode: CameraMode,
    dir: Mutex<PathBuf>,
    levels: Mutex<VecDeque<u16>>,
    requests: Mutex<Vec<ExposureRequest>>,
}

impl FakeCamera {
    fn with_mode(mode: CameraMode, levels: &[u16]) -> Self {
        let levels = if levels.is_empty() { vec![0] } else { levels.to_vec() };
        Self {
            mode,
            dir: Mutex::new(PathBuf::new()),
            levels: Mutex::new(levels.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn local(levels: &[u16]) -> Self {
        Self::with_mode(CameraMode::Local, levels)
    }

    pub fn remote() -> Self {
        Self::with_mode(CameraMode::Remote, &[])
    }

    pub fn empty() -> Self {
        Self::with_mode(CameraMode::Empty, &[])
    }

    pub fn failing(message: &str) -> Self {
        Self::with_mode(CameraMode::Failing(message.to_string()), &[])
    }

    pub fn garbage() -> Self {
        Self::with_mode(CameraMode::Garbage, &[])
    }

    pub fn oversized() -> Self {
        Self::with_mode(CameraMode::Oversized, &[])
    }

    pub fn requests(&self) -> Vec<ExposureRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CameraOps for FakeCamera {
    async fn expose(&self, request: &ExposureRequest) -> DeviceResult<Vec<Frame>> {
        self.requests.lock().unwrap().push(request.clone());
        let path = self.dir.lock().unwrap().join(&request.filename);

        match &self.mode {
            CameraMode::Local => {
                write_flat(&path, next_scripted(&self.levels));
                Ok(vec![Frame {
                    path: path.to_string_lossy().into_owned(),
                    url: None,
                }])
            }
            CameraMode::Remote => Ok(vec![Frame {
                path: format!("C:\\Images\\{}", request.filename),
                url: Some(format!("http://imageserver/{}", request.filename)),
            }]),
            CameraMode::Empty => Ok(Vec::new()),
            CameraMode::Failing(message) => Err(message.clone()),
            CameraMode::Oversized => {
                write_oversized_header(&path);
                Ok(vec![Frame {
                    path: path.to_string_lossy().into_owned(),
                    url: None,
                }])
            }
            CameraMode::Garbage => {
                std::fs::write(&path, b"this is not a FITS file").unwrap();
                Ok(vec![Frame {
                    path: path.to_string_lossy().into_owned(),
                    url: None,
                }])
            }
        }
    }
}

// =========================================================================
// FILTER WHEEL
// =========================================================================

#[derive(Default)]
pub(crate) struct FakeFilterWheel {
    selected: Mutex<Vec<String>>,
    fail: AtomicBool,
    /// Fail once this many filters have been selected
    fail_after: Mutex<Option<usize>>,
}

impl FakeFilterWheel {
    pub fn selected(&self) -> Vec<String> {
        self.selected.lock().unwrap().clone()
    }

    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_after(&self, selections: usize) {
        *self.fail_after.lock().unwrap() = Some(selections);
    }
}

#[async_trait]
impl FilterWheelOps for FakeFilterWheel {
    async fn set_filter(&self, filter: &str) -> DeviceResult<()> {
        let mut selected = self.selected.lock().unwrap();
        let exhausted = self
            .fail_after
            .lock()
            .unwrap()
            .is_some_and(|limit| selected.len() >= limit);
        if self.fail.load(Ordering::SeqCst) || exhausted {
            return Err("filter wheel jammed".to_string());
        }
        selected.push(filter.to_string());
        Ok(())
    }
}

// =========================================================================
// IMAGE SERVER
// =========================================================================

/// How the fake image server answers a download
#[derive(Clone, Copy)]
pub(crate) enum DownloadOutcome {
    Transferred,
    Refused,
    /// Transport failure, reported as `Err`
    Unreachable,
}

pub(crate) struct FakeImageServer {
    night_dir: PathBuf,
    outcome: DownloadOutcome,
    level: u16,
    downloads: Mutex<Vec<(Frame, PathBuf)>>,
    released: Mutex<Vec<Frame>>,
}

impl FakeImageServer {
    pub fn downloads(&self) -> Vec<(Frame, PathBuf)> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<Frame> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageServerOps for FakeImageServer {
    fn default_night_dir(&self) -> PathBuf {
        self.night_dir.clone()
    }

    async fn download(&self, frame: &Frame, destination: &Path) -> DeviceResult<bool> {
        self.downloads
            .lock()
            .unwrap()
            .push((frame.clone(), destination.to_path_buf()));
        match self.outcome {
            DownloadOutcome::Transferred => {}
            DownloadOutcome::Refused => return Ok(false),
            DownloadOutcome::Unreachable => {
                return Err("connection refused by imageserver:80".to_string())
            }
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        write_flat(destination, self.level);
        Ok(true)
    }

    async fn release(&self, frame: &Frame) -> DeviceResult<()> {
        self.released.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

// =========================================================================
// FIXTURE
// =========================================================================

/// A full device set over a scratch directory
pub(crate) struct Fixture {
    pub devices: SkyFlatDevices,
    pub site: Arc<ScriptedSite>,
    pub telescope: Arc<RecordingTelescope>,
    pub camera: Arc<FakeCamera>,
    pub filter_wheel: Arc<FakeFilterWheel>,
    pub image_server: Arc<FakeImageServer>,
    night_dir: PathBuf,
    _scratch: tempfile::TempDir,
}

impl Fixture {
    fn build(camera: FakeCamera, outcome: DownloadOutcome, server_level: u16) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let camera_dir = scratch.path().join("camera");
        std::fs::create_dir_all(&camera_dir).unwrap();
        *camera.dir.lock().unwrap() = camera_dir;
        let night_dir = scratch.path().join("night").join("20240309");

        let site = Arc::new(ScriptedSite::new(&[-7.0]));
        let telescope = Arc::new(RecordingTelescope::default());
        let camera = Arc::new(camera);
        let filter_wheel = Arc::new(FakeFilterWheel::default());
        let image_server = Arc::new(FakeImageServer {
            night_dir: night_dir.clone(),
            outcome,
            level: server_level,
            downloads: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        });

        let devices = SkyFlatDevices {
            site: site.clone(),
            telescope: telescope.clone(),
            camera: camera.clone(),
            filter_wheel: Some(filter_wheel.clone()),
            image_server: image_server.clone(),
        };

        Self {
            devices,
            site,
            telescope,
            camera,
            filter_wheel,
            image_server,
            night_dir,
            _scratch: scratch,
        }
    }

    /// Camera writes frames locally at the scripted levels
    pub fn local(levels: &[u16]) -> Self {
        Self::build(FakeCamera::local(levels), DownloadOutcome::Transferred, 0)
    }

    /// Camera on a remote Windows host, frames fetched through the image server
    pub fn remote(outcome: DownloadOutcome, level: u16) -> Self {
        Self::build(FakeCamera::remote(), outcome, level)
    }

    pub fn with_camera(camera: FakeCamera) -> Self {
        Self::build(camera, DownloadOutcome::Transferred, 0)
    }

    pub fn with_site(mut self, site: ScriptedSite) -> Self {
        let site = Arc::new(site);
        self.devices.site = site.clone();
        self.site = site;
        self
    }

    pub fn night_dir(&self) -> &Path {
        &self.night_dir
    }
}
