//! Eventide Factor series and H9 pedals.
//!
//! The pedals answer the universal identity inquiry, then speak a text based
//! protocol: key/value queries (`F0 1C 70 <dev> <type> <key×4> F7`) and a bulk
//! dump of every preset as CRLF separated lines, seven per preset.
//!
//! There is no way to read a single preset without loading it, so the whole
//! bank is read on listing and kept in the dialect state. Downloads and
//! renames are served from there.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::Backend;
use crate::connector::Connector;
use crate::errors::BackendError;
use crate::filesystem::path::{find_item, id_from_path, id_name_from_path, sanitize_file_name};
use crate::filesystem::{FsCapabilities, FsOperations, FsOptions, Item, ItemIterator};
use crate::ignore_poison::IgnorePoison;
use crate::job_control::{CancelToken, JobControl};
use crate::sysex::{IDENTITY_REQUEST, SYSEX_END, SysexTransfer};
use crate::types::MidiInfo;

const REQUEST_HEADER: [u8; 4] = [0xf0, 0x1c, 0x70, 0x00];
const DEVICE_ID_OFFSET: usize = 3;

const MSG_TYPE_OBJECT: u8 = 0x31;
const MSG_TYPE_VALUE: u8 = 0x3b;

const OP_PRESETS_WANT: u8 = 0x48;
const OP_PRESETS_DUMP: u8 = 0x49;

const KEY_VERSION: &str = "0000";
const KEY_SWITCHES: &str = "0001";
const KEY_BANKS_LO: &str = "0206";
const KEY_BANKS: &str = "020A";

/// Switch count, after removing the surrounding quotes.
const FACTOR_SW_LEN: usize = 17;
const H9_SW_LEN: usize = 18;

const EVENTIDE_ID: [u8; 3] = [0x1c, 0, 0];
const FAMILY_ID: [u8; 2] = [0, 6];
const MODEL_ID: [u8; 2] = [0x11, 0];
const MIN_IDENTITY_REPLY_LEN: usize = 16;

const TEXT_OFFSET: usize = 7;
const NUMBER_OFFSET: usize = 9;
const PRESET_DUMP_OFFSET: usize = 5;
const LINE_SEPARATOR: &str = "\r\n";
const LINES_PER_PRESET: usize = 7;
const NAME_LINE: usize = 6;

/// Header, op, brackets, one digit, NUL and end marker.
const SINGLE_PRESET_MIN_LEN: usize = REQUEST_HEADER.len() + 5;
/// Largest single preset seen is 233 bytes.
const SINGLE_PRESET_MAX_LEN: usize = 256;

/// Reading 100 presets takes more than 10 s.
const TOTAL_PRESETS_TIMEOUT: Duration = Duration::from_secs(20);

pub const FS_PRESET: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedalKind {
    Factor,
    H9,
}

impl PedalKind {
    fn from_switches(count: usize) -> Option<Self> {
        match count {
            FACTOR_SW_LEN => Some(Self::Factor),
            H9_SW_LEN => Some(Self::H9),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Factor => "Eventide Factor",
            Self::H9 => "Eventide H9",
        }
    }
}

/// Seven text lines; the last one is the preset name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PresetRecord {
    lines: Vec<String>,
}

impl PresetRecord {
    fn name(&self) -> &str {
        &self.lines[NAME_LINE]
    }

    /// Dump message of this preset alone.
    fn to_message(&self) -> Vec<u8> {
        encode_preset(&self.lines)
    }
}

/// Per-pedal state kept in the backend.
#[derive(Debug)]
pub struct EfactorState {
    device_id: u8,
    kind: PedalKind,
    min: u32,
    presets: u32,
    records: Mutex<Option<Vec<PresetRecord>>>,
}

impl EfactorState {
    pub fn kind(&self) -> PedalKind {
        self.kind
    }

    /// Id of the first preset slot.
    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn presets(&self) -> u32 {
        self.presets
    }

    fn index_of(&self, id: u32, path: &str) -> Result<usize, BackendError> {
        id.checked_sub(self.min)
            .filter(|index| *index < self.presets)
            .map(|index| index as usize)
            .ok_or_else(|| BackendError::invalid_path(path))
    }
}

fn op_message(op: u8) -> Vec<u8> {
    let mut msg = REQUEST_HEADER.to_vec();
    msg.push(op);
    msg.push(SYSEX_END);
    msg
}

fn get_message(msg_type: u8, key: &str) -> Vec<u8> {
    let mut msg = REQUEST_HEADER.to_vec();
    msg.push(msg_type);
    msg.extend_from_slice(key.as_bytes());
    msg.push(SYSEX_END);
    msg
}

/// Text starting at `offset`, up to the first NUL or end marker.
fn text_at(msg: &[u8], offset: usize) -> String {
    let tail = msg.get(offset..).unwrap_or_default();
    let end = memchr::memchr2(0, SYSEX_END, tail).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

/// Leading decimal integer of the text at `offset`, 0 if there is none.
fn number_at(msg: &[u8], offset: usize) -> i64 {
    let text = text_at(msg, offset);
    let text = text.trim_start();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text.strip_prefix('+').unwrap_or(text)),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().map_or(0, |n| sign * n)
}

/// Preset range of a Factor pedal from its bank range, `None` on overflow.
fn factor_range(min_bank: i64, max_bank: i64) -> Option<(i64, i64)> {
    let min = min_bank.checked_mul(2)?;
    let max = max_bank.checked_add(1)?.checked_mul(2)?;
    Some((min, max))
}

fn split_lines(text: &str) -> Vec<String> {
    text.split(LINE_SEPARATOR).map(str::to_string).collect()
}

fn parse_dump(msg: &[u8]) -> Vec<PresetRecord> {
    let lines = split_lines(&text_at(msg, PRESET_DUMP_OFFSET));
    lines
        .chunks_exact(LINES_PER_PRESET)
        .map(|chunk| PresetRecord { lines: chunk.to_vec() })
        .collect()
}

fn encode_preset(lines: &[String]) -> Vec<u8> {
    let mut msg = REQUEST_HEADER.to_vec();
    msg.push(OP_PRESETS_DUMP);
    for line in lines {
        msg.extend_from_slice(line.as_bytes());
        msg.extend_from_slice(LINE_SEPARATOR.as_bytes());
    }
    msg.extend_from_slice(&[0, SYSEX_END]);
    msg
}

/// Rewrites a preset dump for slot `id` of the pedal `device_id`.
///
/// The leading `[n]` tag of the first line is replaced with the 1-based slot
/// number and the header device byte with the pedal's.
fn upload_message(input: &[u8], device_id: u8, id: u32) -> Result<Vec<u8>, BackendError> {
    if input.len() > SINGLE_PRESET_MAX_LEN || input.len() <= SINGLE_PRESET_MIN_LEN {
        return Err(BackendError::bad_message(format!("bad preset length {}", input.len())));
    }
    let mut header = [0u8; 4];
    header.copy_from_slice(&input[..REQUEST_HEADER.len()]);
    // Dumps from other pedals carry their own device number
    header[DEVICE_ID_OFFSET] = 0;
    if header != REQUEST_HEADER || input[REQUEST_HEADER.len()] != OP_PRESETS_DUMP {
        return Err(BackendError::bad_message("not an Eventide preset"));
    }

    let body = &input[PRESET_DUMP_OFFSET..];
    let space = memchr::memchr(b' ', body).ok_or_else(|| BackendError::bad_message("preset without id tag"))?;

    let mut msg = input[..PRESET_DUMP_OFFSET].to_vec();
    msg[DEVICE_ID_OFFSET] = device_id;
    msg.extend_from_slice(format!("[{}]", (id % 100) + 1).as_bytes());
    msg.extend_from_slice(&body[space..]);
    Ok(msg)
}

/// Reads every preset from the pedal and caches the result.
///
/// The bulk read toggles the pedal's relays, so a repeated read first gives
/// it time to settle.
fn fetch_presets(
    backend: &Backend,
    state: &EfactorState,
    cancel: &CancelToken,
) -> Result<Vec<PresetRecord>, BackendError> {
    let transport = backend.transport();
    let config = transport.config();
    if state.records.lock_ignore_poison().is_some() {
        cancel.sleep(config.bulk_read_settle, config.poll_interval)?;
    }

    debug!("Reading all presets from {}", backend.name());
    // The dump changes with every write, never answer it from the cache
    let mut transfer = SysexTransfer::new(op_message(OP_PRESETS_WANT), TOTAL_PRESETS_TIMEOUT)
        .uncached()
        .with_token(cancel.clone());
    transport.tx_and_rx(&mut transfer)?;
    let records = parse_dump(transfer.raw());
    if records.len() < state.presets as usize {
        warn!(
            "Preset dump holds {} presets, {} expected",
            records.len(),
            state.presets
        );
    }
    *state.records.lock_ignore_poison() = Some(records.clone());
    Ok(records)
}

fn preset_record(
    backend: &Backend,
    state: &EfactorState,
    path: &str,
    cancel: &CancelToken,
) -> Result<PresetRecord, BackendError> {
    let index = state.index_of(id_from_path(path)?, path)?;
    let cached = state.records.lock_ignore_poison().clone();
    let records = match cached {
        Some(records) => records,
        None => fetch_presets(backend, state, cancel)?,
    };
    records
        .get(index)
        .cloned()
        .ok_or_else(|| BackendError::invalid_path(path))
}

/// Keeps the cache in line with a preset just sent to slot `index`.
fn refresh_cached_preset(state: &EfactorState, index: usize, msg: &[u8]) {
    let mut records = state.records.lock_ignore_poison();
    let Some(cached) = records.as_mut() else {
        return;
    };
    let lines = split_lines(&text_at(msg, PRESET_DUMP_OFFSET));
    if lines.len() >= LINES_PER_PRESET
        && let Some(record) = cached.get_mut(index)
    {
        record.lines = lines[..LINES_PER_PRESET].to_vec();
        return;
    }
    debug!("Dropping preset cache after upload to slot {}", index);
    *records = None;
}

pub struct PresetFs;

impl FsOperations for PresetFs {
    fn id(&self) -> u32 {
        FS_PRESET
    }

    fn name(&self) -> &'static str {
        "preset"
    }

    fn gui_name(&self) -> &'static str {
        "Presets"
    }

    fn extension(&self) -> &'static str {
        "syx"
    }

    fn max_name_len(&self) -> usize {
        16
    }

    fn options(&self) -> FsOptions {
        FsOptions::SINGLE_OP | FsOptions::SLOT_STORAGE | FsOptions::SORT_BY_ID
    }

    fn capabilities(&self) -> FsCapabilities {
        FsCapabilities::LIST | FsCapabilities::DOWNLOAD | FsCapabilities::UPLOAD | FsCapabilities::RENAME
    }

    fn read_dir<'a>(&self, backend: &'a Backend, dir: &str) -> Result<ItemIterator<'a>, BackendError> {
        if dir != "/" {
            return Err(BackendError::not_a_directory(dir));
        }
        let state = backend.data::<EfactorState>()?;
        let records = fetch_presets(backend, state, &CancelToken::new())?;

        let min = state.min;
        let names: Vec<String> = records
            .into_iter()
            .take(state.presets as usize)
            .map(|record| record.lines[NAME_LINE].clone())
            .collect();
        Ok(ItemIterator::new(
            names
                .into_iter()
                .enumerate()
                .map(move |(index, name)| Item::file(min + index as u32, name, None)),
        ))
    }

    fn download(&self, backend: &Backend, path: &str, job: &JobControl) -> Result<Vec<u8>, BackendError> {
        job.begin(1);
        let state = backend.data::<EfactorState>()?;
        let record = preset_record(backend, state, path, &job.cancel_token())?;
        let msg = record.to_message();

        job.check_active()?;
        job.advance(1.0);
        debug!("Preset {} ({}) is {} bytes", path, record.name(), msg.len());
        Ok(msg)
    }

    fn upload(&self, backend: &Backend, path: &str, data: &[u8], job: &JobControl) -> Result<(), BackendError> {
        job.begin(1);
        let state = backend.data::<EfactorState>()?;
        let id = id_from_path(path)?;
        let index = state.index_of(id, path)?;
        let msg = upload_message(data, state.device_id, id)?;

        let transport = backend.transport();
        let config = transport.config();
        {
            let _exchange = transport.begin_exchange();
            let mut transfer = SysexTransfer::new(msg.as_slice(), config.sysex_timeout).with_token(job.cancel_token());
            let sent = transport.tx_sysex(&mut transfer);
            transport.clear_cache();
            sent?;

            // The pedal never answers a preset dump
            let mut listen = SysexTransfer::receive(config.silence_window).with_token(job.cancel_token());
            match transport.rx_sysex(&mut listen) {
                Err(BackendError::TimedOut { .. }) => {}
                Ok(()) => {
                    warn!("Unexpected reply to preset upload: {:02x?}", listen.raw());
                    return Err(BackendError::io("unexpected reply to preset upload"));
                }
                Err(e) => return Err(e),
            }
        }
        refresh_cached_preset(state, index, &msg);

        job.check_active()?;
        job.advance(1.0);
        info!("Preset {} stored in slot {}", path, id);
        Ok(())
    }

    fn rename(&self, backend: &Backend, src: &str, dst: &str) -> Result<(), BackendError> {
        let id = id_from_path(src)?;
        let name = match id_name_from_path(dst) {
            Ok((_, Some(name))) => name,
            _ => dst.trim_start_matches('/').to_string(),
        };
        // A line break would split the record
        if name.is_empty() || name.chars().any(char::is_control) {
            return Err(BackendError::invalid_path(dst));
        }
        let name: String = name.chars().take(self.max_name_len()).collect();
        debug!("Renaming preset {} to {}", id, name);

        let job = JobControl::new();
        let state = backend.data::<EfactorState>()?;
        let record = preset_record(backend, state, src, &job.cancel_token())?;
        let mut lines = record.lines;
        lines[NAME_LINE] = name;
        self.upload(backend, &format!("/{id}"), &encode_preset(&lines), &job)
    }

    fn slot(&self, backend: &Backend, item: &Item) -> Option<String> {
        let state = backend.data::<EfactorState>().ok()?;
        let slot = match state.kind {
            PedalKind::Factor => format!("[{}:{}]", item.id / 2 + 1, item.id % 2 + 1),
            PedalKind::H9 => format!("{}", item.id + 1),
        };
        Some(slot)
    }

    fn download_path(
        &self,
        backend: &Backend,
        items: ItemIterator<'_>,
        dst_dir: &Path,
        src_path: &str,
    ) -> Result<PathBuf, BackendError> {
        let state = backend.data::<EfactorState>()?;
        let item = find_item(items, src_path)?;
        Ok(dst_dir.join(format!(
            "{} {}.{}",
            state.kind.label(),
            sanitize_file_name(&item.name),
            self.extension()
        )))
    }
}

static EFACTOR_FILESYSTEMS: [&dyn FsOperations; 1] = [&PresetFs];

pub struct EfactorConnector;

impl EfactorConnector {
    fn query(backend: &Backend, msg_type: u8, key: &str) -> Result<Vec<u8>, BackendError> {
        let transport = backend.transport();
        let reply = transport.transact(&get_message(msg_type, key), transport.config().sysex_timeout)?;
        if reply.len() <= REQUEST_HEADER.len() {
            return Err(BackendError::bad_message(format!("short reply to key {key}")));
        }
        Ok(reply)
    }
}

impl Connector for EfactorConnector {
    fn name(&self) -> &'static str {
        "efactor"
    }

    fn handshake(&self, backend: &mut Backend) -> Result<(), BackendError> {
        let transport = backend.transport();
        transport.drain();

        // The inquiry is standard, the reply layout is not
        let reply = match transport.transact(&IDENTITY_REQUEST, transport.config().guess_timeout) {
            Ok(reply) => reply,
            Err(BackendError::TimedOut { .. }) => {
                return Err(BackendError::not_found("no identity reply"));
            }
            Err(e) => return Err(e),
        };
        if reply.len() < MIN_IDENTITY_REPLY_LEN {
            debug!("Illegal MIDI identity reply length {}", reply.len());
            return Err(BackendError::not_found("identity reply too short"));
        }
        let midi_info = MidiInfo::from_identity_reply(&reply).map_err(|e| BackendError::not_found(e.to_string()))?;
        if midi_info.company != EVENTIDE_ID || midi_info.family != FAMILY_ID || midi_info.model != MODEL_ID {
            return Err(BackendError::not_found(format!("not an Eventide pedal: {midi_info}")));
        }

        let reply = Self::query(backend, MSG_TYPE_OBJECT, KEY_VERSION)?;
        let device_id = reply[DEVICE_ID_OFFSET];
        debug!("Version: {}", text_at(&reply, TEXT_OFFSET));

        let reply = Self::query(backend, MSG_TYPE_VALUE, KEY_SWITCHES)?;
        let switches = text_at(&reply, TEXT_OFFSET);
        debug!("Switches: {}", switches);
        let kind = switches
            .len()
            .checked_sub(2)
            .and_then(PedalKind::from_switches)
            .ok_or_else(|| BackendError::not_found(format!("illegal switches {switches}")))?;

        let reply = Self::query(backend, MSG_TYPE_OBJECT, KEY_BANKS_LO)?;
        let min = number_at(&reply, NUMBER_OFFSET);
        let reply = Self::query(backend, MSG_TYPE_OBJECT, KEY_BANKS)?;
        let max = number_at(&reply, NUMBER_OFFSET);

        let (min, max) = match kind {
            // Two presets per bank
            PedalKind::Factor => factor_range(min, max)
                .ok_or_else(|| BackendError::bad_message(format!("illegal bank range [{min}, {max}]")))?,
            PedalKind::H9 => (min, max),
        };
        let presets = max
            .checked_sub(min)
            .and_then(|count| u32::try_from(count).ok())
            .ok_or_else(|| BackendError::bad_message(format!("illegal preset range [{min}, {max})")))?;
        let min = u32::try_from(min).map_err(|_| BackendError::bad_message(format!("illegal first preset {min}")))?;
        debug!("Total presets: {} [{}, {})", presets, min, max);

        backend.set_midi_info(midi_info);
        backend.set_name(format!("{} {}", kind.label(), midi_info.version_string()));
        backend.set_filesystems(&EFACTOR_FILESYSTEMS);
        backend.set_data(EfactorState {
            device_id,
            kind,
            min,
            presets,
            records: Mutex::new(None),
        });
        info!("{} pedal detected with {} presets", kind.label(), presets);
        Ok(())
    }
}
