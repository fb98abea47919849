//! Eventide dialect against a simulated pedal.

use super::efactor::{EfactorConnector, EfactorState, PedalKind};
use crate::backend::Backend;
use crate::config::TransportConfig;
use crate::connector::{DefaultConnector, detect_with};
use crate::errors::BackendError;
use crate::filesystem::{self, Item};
use crate::job_control::JobControl;
use crate::sysex::IDENTITY_REQUEST;
use crate::transport::Transport;
use crate::transport::virtual_port::{VirtualHandle, VirtualPort};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEVICE_ID: u8 = 3;

/// What the simulated pedal knows and how it behaves.
struct FakePedal {
    company: u8,
    switches: usize,
    banks_lo: i64,
    banks: i64,
    presets: Vec<Vec<String>>,
    answer_uploads: bool,
    dumps_sent: usize,
    dump_requests: Vec<Instant>,
}

impl FakePedal {
    fn h9(presets: usize) -> Self {
        Self {
            company: 0x1c,
            switches: 18,
            banks_lo: 0,
            banks: presets as i64,
            presets: (0..presets).map(preset_lines).collect(),
            answer_uploads: false,
            dumps_sent: 0,
            dump_requests: Vec::new(),
        }
    }

    /// Two presets per bank, `banks` + 1 banks.
    fn factor(banks: i64) -> Self {
        let presets = 2 * (banks as usize + 1);
        Self {
            switches: 17,
            banks,
            ..Self::h9(presets)
        }
    }

    fn dump(&self) -> Vec<u8> {
        let mut msg = vec![0xf0, 0x1c, 0x70, DEVICE_ID, 0x49];
        for line in self.presets.iter().flatten() {
            msg.extend_from_slice(line.as_bytes());
            msg.extend_from_slice(b"\r\n");
        }
        msg.extend_from_slice(&[0, 0xf7]);
        msg
    }

    fn respond(&mut self, msg: &[u8]) -> Vec<Vec<u8>> {
        if msg == IDENTITY_REQUEST {
            let mut reply = vec![0xf0, 0x7e, 0x00, 0x06, 0x02, self.company, 0x00, 0x06, 0x11, 0x00, 5, 1, 0, 7];
            reply.extend_from_slice(b"<xml/>");
            reply.push(0xf7);
            return vec![reply];
        }
        if msg.len() < 6 || msg[..3] != [0xf0, 0x1c, 0x70] {
            return Vec::new();
        }

        match msg[4] {
            0x48 => {
                self.dumps_sent += 1;
                self.dump_requests.push(Instant::now());
                vec![self.dump()]
            }
            0x49 => self.store(msg),
            0x31 | 0x3b if msg.len() == 10 => {
                let key = String::from_utf8_lossy(&msg[5..9]).into_owned();
                let mut reply = vec![0xf0, 0x1c, 0x70, DEVICE_ID, msg[4]];
                match key.as_str() {
                    "0000" => reply.extend_from_slice(b"0000 V5.1.0"),
                    "0001" => {
                        reply.extend_from_slice(b"00'");
                        reply.extend(std::iter::repeat_n(b'0', self.switches));
                        reply.push(b'\'');
                    }
                    "0206" => reply.extend_from_slice(format!("0206{}", self.banks_lo).as_bytes()),
                    "020A" => reply.extend_from_slice(format!("020A{}", self.banks).as_bytes()),
                    _ => return Vec::new(),
                }
                reply.extend_from_slice(&[0, 0xf7]);
                vec![reply]
            }
            _ => Vec::new(),
        }
    }

    /// Stores an uploaded preset in the slot named by its `[n]` tag.
    fn store(&mut self, msg: &[u8]) -> Vec<Vec<u8>> {
        let end = msg.iter().position(|&b| b == 0).unwrap_or(msg.len());
        let text = String::from_utf8_lossy(&msg[5..end]).into_owned();
        let lines: Vec<String> = text.split("\r\n").take(7).map(str::to_string).collect();
        let tag: usize = lines[0][1..lines[0].find(']').unwrap()].parse().unwrap();
        self.presets[tag - 1] = lines;

        if self.answer_uploads {
            vec![vec![0xf0, 0x1c, 0x70, DEVICE_ID, 0x7f, 0xf7]]
        } else {
            Vec::new()
        }
    }
}

fn preset_lines(index: usize) -> Vec<String> {
    vec![
        format!("[{}] 12 3 0 0", index + 1),
        "0 0 0 0".to_string(),
        "1 1 1 1".to_string(),
        "2 2 2 2".to_string(),
        "3 3 3 3".to_string(),
        "4 4 4 4".to_string(),
        format!("Preset {index}"),
    ]
}

fn test_config() -> TransportConfig {
    TransportConfig {
        poll_interval: Duration::from_millis(2),
        sysex_timeout: Duration::from_millis(300),
        guess_timeout: Duration::from_millis(50),
        batch_idle_timeout: Duration::from_millis(20),
        rest_time: Duration::from_millis(2),
        bulk_read_settle: Duration::from_millis(10),
        silence_window: Duration::from_millis(30),
        ..TransportConfig::defaults()
    }
}

fn connect(pedal: FakePedal) -> (Result<Backend, BackendError>, Arc<Mutex<FakePedal>>, VirtualHandle) {
    crate::init_test_logging();
    let pedal = Arc::new(Mutex::new(pedal));
    let device = Arc::clone(&pedal);
    let (port, handle) = VirtualPort::new("H9 Pedal", move |msg| device.lock().unwrap().respond(msg));
    let transport = Transport::new("virtual:0", Box::new(port), test_config());
    let backend = detect_with(transport, &[&EfactorConnector, &DefaultConnector], None, None);
    (backend, pedal, handle)
}

fn expected_download(lines: &[String]) -> Vec<u8> {
    let mut msg = vec![0xf0, 0x1c, 0x70, 0x00, 0x49];
    for line in lines {
        msg.extend_from_slice(line.as_bytes());
        msg.extend_from_slice(b"\r\n");
    }
    msg.extend_from_slice(&[0, 0xf7]);
    msg
}

fn names(items: &[Item]) -> Vec<&str> {
    items.iter().map(|item| item.name.as_str()).collect()
}

#[test]
fn test_handshake_h9() {
    let (backend, _pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();

    assert_eq!(backend.connector().map(|c| c.name()), Some("efactor"));
    assert_eq!(backend.name(), "Eventide H9 5.1.0.7");
    assert_eq!(backend.midi_info().company, [0x1c, 0, 0]);
    assert_eq!(backend.info().filesystems, 1);
    assert_eq!(filesystem::info(&backend), "Eventide H9 5.1.0.7; filesystems=preset");

    let state = backend.data::<EfactorState>().unwrap();
    assert_eq!(state.kind(), PedalKind::H9);
    assert_eq!(state.min(), 0);
    assert_eq!(state.presets(), 3);
}

#[test]
fn test_handshake_factor_doubles_banks() {
    let mut pedal = FakePedal::factor(1);
    pedal.banks_lo = 1;
    let (backend, _pedal, _handle) = connect(pedal);
    let backend = backend.unwrap();

    assert_eq!(backend.name(), "Eventide Factor 5.1.0.7");
    let state = backend.data::<EfactorState>().unwrap();
    assert_eq!(state.kind(), PedalKind::Factor);
    // min = 2 * 1, max = 2 * (1 + 1)
    assert_eq!(state.min(), 2);
    assert_eq!(state.presets(), 2);
}

#[test]
fn test_other_vendor_falls_back_to_default() {
    let mut pedal = FakePedal::h9(3);
    pedal.company = 0x43;
    let (backend, _pedal, _handle) = connect(pedal);
    let backend = backend.unwrap();

    assert_eq!(backend.connector().map(|c| c.name()), Some("default"));
    assert_eq!(backend.name(), "MIDI device H9 Pedal");
    assert!(backend.filesystems().is_empty());
}

#[test]
fn test_unknown_switch_count_is_not_found() {
    let mut pedal = FakePedal::h9(3);
    pedal.switches = 16;
    let pedal = Arc::new(Mutex::new(pedal));
    let device = Arc::clone(&pedal);
    let (port, handle) = VirtualPort::new("H9 Pedal", move |msg| device.lock().unwrap().respond(msg));
    let transport = Transport::new("virtual:0", Box::new(port), test_config());

    let result = detect_with(transport, &[&EfactorConnector], None, None);
    assert!(matches!(result, Err(BackendError::NotFound { .. })));
    assert!(handle.is_closed());
}

#[test]
fn test_silent_port_is_not_found() {
    let (port, _handle) = VirtualPort::silent("Nothing");
    let transport = Transport::new("virtual:0", Box::new(port), test_config());

    let result = detect_with(transport, &[&EfactorConnector], None, None);
    assert!(matches!(result, Err(BackendError::NotFound { .. })));
}

#[test]
fn test_list_presets() {
    let (backend, pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();

    let items = filesystem::list_sorted(&backend, "/preset").unwrap();
    assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(names(&items), vec!["Preset 0", "Preset 1", "Preset 2"]);
    assert!(items.iter().all(|i| i.size.is_none() && !i.is_dir()));

    // Every listing reads the bank again
    filesystem::list_sorted(&backend, "/preset").unwrap();
    assert_eq!(pedal.lock().unwrap().dumps_sent, 2);
}

#[test]
fn test_list_rejects_subdirectories() {
    let (backend, _pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    assert!(matches!(
        filesystem::list(&backend, "/preset/1"),
        Err(BackendError::NotADirectory { .. })
    ));
}

#[test]
fn test_download_preset() {
    let (backend, pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    let job = JobControl::new();

    // Without a prior listing the bank is read on demand
    let data = filesystem::download(&backend, "/preset/1", &job).unwrap();
    assert_eq!(data, expected_download(&preset_lines(1)));
    assert_eq!(job.progress().progress, 1.0);

    // The second download is served from the cache
    filesystem::download(&backend, "/preset/2:Preset 2", &JobControl::new()).unwrap();
    assert_eq!(pedal.lock().unwrap().dumps_sent, 1);
}

#[test]
fn test_download_out_of_range_is_invalid_path() {
    let (backend, _pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    assert!(matches!(
        filesystem::download(&backend, "/preset/3", &JobControl::new()),
        Err(BackendError::InvalidPath { .. })
    ));
}

#[test]
fn test_upload_then_download_round_trip() {
    let (backend, pedal, handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();

    let first = filesystem::download(&backend, "/preset/0", &JobControl::new()).unwrap();
    handle.clear_written();

    let job = JobControl::new();
    filesystem::upload(&backend, "/preset/2", &first, &job).unwrap();
    assert_eq!(job.progress().progress, 1.0);

    // Header carries the pedal id and the tag the target slot
    let sent = handle.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][..5], &[0xf0, 0x1c, 0x70, DEVICE_ID, 0x49]);
    assert!(sent[0][5..].starts_with(b"[3] 12 3 0 0\r\n"));

    let mut expected = preset_lines(0);
    expected[0] = "[3] 12 3 0 0".to_string();
    let copy = filesystem::download(&backend, "/preset/2", &JobControl::new()).unwrap();
    assert_eq!(copy, expected_download(&expected));

    let items = filesystem::list_sorted(&backend, "/preset").unwrap();
    assert_eq!(names(&items), vec!["Preset 0", "Preset 1", "Preset 0"]);
    assert_eq!(pedal.lock().unwrap().presets[2], expected);
}

#[test]
fn test_rename_then_list() {
    let (backend, pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();

    filesystem::rename(&backend, "/preset/1", "/preset/1:Glide").unwrap();
    filesystem::rename(&backend, "/preset/2", "Swell").unwrap();

    let items = filesystem::list_sorted(&backend, "/preset").unwrap();
    assert_eq!(names(&items), vec!["Preset 0", "Glide", "Swell"]);
    assert_eq!(pedal.lock().unwrap().presets[1][0], "[2] 12 3 0 0");
}

#[test]
fn test_upload_rejects_malformed_presets() {
    let (backend, _pedal, handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    handle.clear_written();

    let mut not_eventide = vec![0xf0, 0x43, 0x70, 0x00, 0x49];
    not_eventide.extend_from_slice(b"[1] 0 0\r\nName\r\n\x00\xf7");
    let mut no_tag = vec![0xf0, 0x1c, 0x70, 0x00, 0x49];
    no_tag.extend_from_slice(b"[1]0\r\nName\r\n\x00\xf7");
    let too_short = vec![0xf0, 0x1c, 0x70, 0x00, 0x49, 0x00, 0xf7];

    for bad in [not_eventide, no_tag, too_short] {
        let result = filesystem::upload(&backend, "/preset/0", &bad, &JobControl::new());
        assert!(matches!(result, Err(BackendError::BadMessage { .. })), "{result:?}");
    }
    assert!(handle.written().is_empty());
}

#[test]
fn test_reply_to_upload_is_io_error() {
    let mut pedal = FakePedal::h9(3);
    pedal.answer_uploads = true;
    let (backend, _pedal, _handle) = connect(pedal);
    let backend = backend.unwrap();

    let preset = expected_download(&preset_lines(0));
    let result = filesystem::upload(&backend, "/preset/1", &preset, &JobControl::new());
    assert!(matches!(result, Err(BackendError::Io { .. })));
}

#[test]
fn test_cancelled_jobs() {
    let (backend, _pedal, handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    handle.clear_written();

    let job = JobControl::new();
    job.cancel();
    assert_eq!(
        filesystem::download(&backend, "/preset/0", &job),
        Err(BackendError::Cancelled)
    );
    let preset = expected_download(&preset_lines(0));
    assert_eq!(
        filesystem::upload(&backend, "/preset/1", &preset, &job),
        Err(BackendError::Cancelled)
    );
    assert!(handle.written().is_empty());
}

#[test]
fn test_slot_labels() {
    let h9 = Item::file(3, "x", None);
    let (backend, _pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    let ops = backend.fs_operations_by_name("preset").unwrap();
    assert_eq!(ops.slot(&backend, &h9).as_deref(), Some("4"));

    let (backend, _pedal, _handle) = connect(FakePedal::factor(1));
    let backend = backend.unwrap();
    let ops = backend.fs_operations_by_name("preset").unwrap();
    assert_eq!(ops.slot(&backend, &Item::file(3, "x", None)).as_deref(), Some("[2:2]"));
    assert_eq!(ops.slot(&backend, &Item::file(0, "x", None)).as_deref(), Some("[1:1]"));
}

#[test]
fn test_paths() {
    let (backend, _pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();

    let items = filesystem::list(&backend, "/preset").unwrap();
    let local = filesystem::download_path(&backend, items, Path::new("/tmp"), "/preset/1").unwrap();
    assert_eq!(local, PathBuf::from("/tmp/Eventide H9 Preset 1.syx"));

    let mut next = 0;
    assert_eq!(
        filesystem::upload_path(&backend, "/preset/2", "/home/me/Shimmer.syx", &mut next).unwrap(),
        "/preset/2:Shimmer"
    );
}

#[test]
fn test_handshake_rejects_overflowing_bank_count() {
    let mut pedal = FakePedal::h9(3);
    pedal.switches = 17;
    pedal.banks = i64::MAX;
    let (backend, _pedal, handle) = connect(pedal);

    assert!(matches!(backend, Err(BackendError::BadMessage { .. })));
    assert!(handle.is_closed());
}

#[test]
fn test_factor_ids_start_at_first_slot() {
    let mut pedal = FakePedal::factor(2);
    pedal.banks_lo = 1;
    let (backend, _pedal, _handle) = connect(pedal);
    let backend = backend.unwrap();

    let items = filesystem::list_sorted(&backend, "/preset").unwrap();
    assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    assert_eq!(items[1].name, "Preset 1");

    let data = filesystem::download(&backend, "/preset/3", &JobControl::new()).unwrap();
    assert_eq!(data, expected_download(&preset_lines(1)));
}

#[test]
fn test_repeated_listing_waits_for_relays() {
    let (backend, pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();

    filesystem::list_sorted(&backend, "/preset").unwrap();
    filesystem::list_sorted(&backend, "/preset").unwrap();

    let pedal = pedal.lock().unwrap();
    assert_eq!(pedal.dump_requests.len(), 2);
    let gap = pedal.dump_requests[1] - pedal.dump_requests[0];
    assert!(gap >= test_config().bulk_read_settle, "second dump after {gap:?}");
}

#[test]
fn test_rename_then_list_with_response_cache() {
    let (backend, pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    backend.transport().enable_cache();

    filesystem::list_sorted(&backend, "/preset").unwrap();
    filesystem::rename(&backend, "/preset/1", "Glide").unwrap();

    let items = filesystem::list_sorted(&backend, "/preset").unwrap();
    assert_eq!(names(&items), vec!["Preset 0", "Glide", "Preset 2"]);
    assert_eq!(pedal.lock().unwrap().dumps_sent, 2);
}

#[test]
fn test_rename_rejects_line_breaks() {
    let (backend, _pedal, handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();
    handle.clear_written();

    for bad in ["Two\r\nLines", "Tab\there", ""] {
        let result = filesystem::rename(&backend, "/preset/1", bad);
        assert!(matches!(result, Err(BackendError::InvalidPath { .. })), "{bad:?}: {result:?}");
    }
    assert!(handle.written().is_empty());
}

#[test]
fn test_rename_truncates_long_names() {
    let (backend, pedal, _handle) = connect(FakePedal::h9(3));
    let backend = backend.unwrap();

    filesystem::rename(&backend, "/preset/2", "A very long preset name").unwrap();
    assert_eq!(pedal.lock().unwrap().presets[2][6], "A very long pres");

    let items = filesystem::list_sorted(&backend, "/preset").unwrap();
    assert_eq!(items[2].name, "A very long pres");
}
