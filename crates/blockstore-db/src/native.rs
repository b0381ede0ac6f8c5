//! 构件库原生文件格式（.zblk）
//!
//! 快照 + 追加日志：
//! - 文件头（16 字节）后是 Zstd 压缩的 MessagePack 快照
//! - 快照之后是逐条追加的 MessagePack 日志帧（4 字节长度前缀）
//! - 打开时先加载快照再重放日志；压缩时重写为仅含快照的文件
//!
//! 每次修改只追加一帧，写入量与改动大小成正比。

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::store::{Collections, DocumentStore, MemoryStore, StoredDocument};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// 文件魔数 "ZBLK"
const MAGIC: &[u8; 4] = b"ZBLK";

/// 当前文件格式版本
const FORMAT_VERSION: u32 = 1;

/// 文件头长度
const HEADER_SIZE: u64 = 16;

/// 单帧上限，超过视为损坏
const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// 写出文件头：魔数、格式版本、预留标志位、压缩后快照长度，均为小端
fn write_header(image: &mut Vec<u8>, snapshot_size: u32) {
    image.extend_from_slice(MAGIC);
    for field in [FORMAT_VERSION, 0, snapshot_size] {
        image.extend_from_slice(&field.to_le_bytes());
    }
}

/// 校验文件头，返回快照长度
fn read_header(reader: &mut impl Read) -> Result<u32, StoreError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(StoreError::InvalidFormat(
            "Invalid magic number, not a blockstore file".to_string(),
        ));
    }

    let version = read_u32(reader)?;
    if version > FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(format!(
            "File version {} is newer than supported version {}",
            version, FORMAT_VERSION
        )));
    }

    // 标志位
    read_u32(reader)?;
    Ok(read_u32(reader)?)
}

/// 日志帧：长度前缀 + MessagePack 负载
fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>, StoreError> {
    let payload = rmp_serde::to_vec(entry)?;
    let frame_len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| StoreError::Engine(format!("Log frame of {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&frame_len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// 快照内容
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    collections: Collections,
}

/// 日志帧
#[derive(Debug, Serialize, Deserialize)]
enum LogEntry {
    Put {
        collection: String,
        key: String,
        document: StoredDocument,
    },
    Remove {
        collection: String,
        key: String,
    },
}

/// 将集合编码为完整的文件映像（文件头 + 快照）
pub(crate) fn encode_image(collections: &Collections, level: i32) -> Result<Vec<u8>, StoreError> {
    let snapshot = Snapshot {
        collections: collections.clone(),
    };

    // 序列化为 MessagePack 并压缩
    let msgpack_data = rmp_serde::to_vec(&snapshot)?;
    let compressed_data = zstd::encode_all(msgpack_data.as_slice(), level)?;

    let snapshot_size = u32::try_from(compressed_data.len())
        .map_err(|_| StoreError::Corruption("Snapshot exceeds 4 GiB".to_string()))?;

    let mut image = Vec::with_capacity(HEADER_SIZE as usize + compressed_data.len());
    write_header(&mut image, snapshot_size);
    image.extend_from_slice(&compressed_data);
    Ok(image)
}

/// 从文件映像解码，返回集合、已重放的日志帧数与有效数据长度
fn decode_image(reader: &mut impl Read) -> Result<(Collections, usize, u64), StoreError> {
    let snapshot_size = read_header(reader)?;

    let mut compressed_data = vec![0u8; snapshot_size as usize];
    reader.read_exact(&mut compressed_data)?;
    let msgpack_data = zstd::decode_all(compressed_data.as_slice())?;
    let snapshot: Snapshot = rmp_serde::from_slice(&msgpack_data)?;

    let mut collections = snapshot.collections;
    let mut valid_len = HEADER_SIZE + u64::from(snapshot_size);
    let mut frames = 0;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let frame_len = u32::from_le_bytes(len_buf);
        if frame_len > MAX_FRAME_SIZE {
            tracing::warn!("Dropping log tail: frame length {} is implausible", frame_len);
            break;
        }

        let mut frame = vec![0u8; frame_len as usize];
        match reader.read_exact(&mut frame) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!("Dropping truncated log frame after {} frames", frames);
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let entry: LogEntry = match rmp_serde::from_slice(&frame) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Dropping undecodable log frame after {} frames: {}", frames, e);
                break;
            }
        };
        apply_entry(&mut collections, entry);

        frames += 1;
        valid_len += 4 + u64::from(frame_len);
    }

    Ok((collections, frames, valid_len))
}

fn apply_entry(collections: &mut Collections, entry: LogEntry) {
    match entry {
        LogEntry::Put {
            collection,
            key,
            document,
        } => {
            collections.entry(collection).or_default().insert(key, document);
        }
        LogEntry::Remove { collection, key } => {
            if let Some(documents) = collections.get_mut(&collection) {
                documents.remove(&key);
            }
        }
    }
}

/// 文件存储引擎
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: MemoryStore,
    writer: BufWriter<File>,
    /// 上次压缩后追加的日志帧数
    pending_frames: usize,
    compression_level: i32,
    auto_compact_threshold: usize,
}

impl FileStore {
    /// 打开存储文件，不存在时创建
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            write_image(&path, &encode_image(&Collections::new(), config.compression_level)?)?;
            tracing::info!("Created store {}", path.display());
        }

        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        let (collections, frames, valid_len) = decode_image(&mut reader)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        if file.metadata()?.len() > valid_len {
            // 截掉损坏的日志尾部，保证后续追加的帧可读
            file.set_len(valid_len)?;
        }

        let mut data = MemoryStore::from_collections(collections);
        data.set_compression_level(config.compression_level);

        tracing::info!(
            "Opened store {} ({} documents, {} log frames)",
            path.display(),
            data.total_documents(),
            frames
        );

        Ok(Self {
            path,
            data,
            writer: BufWriter::new(file),
            pending_frames: frames,
            compression_level: config.compression_level,
            auto_compact_threshold: config.auto_compact_threshold,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 上次压缩后追加的日志帧数
    pub fn pending_frames(&self) -> usize {
        self.pending_frames
    }

    fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        let frame = encode_frame(entry)?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        self.pending_frames += 1;
        Ok(())
    }

    fn maybe_compact(&mut self) -> Result<(), StoreError> {
        if self.auto_compact_threshold > 0 && self.pending_frames >= self.auto_compact_threshold {
            self.compact()?;
        }
        Ok(())
    }
}

impl DocumentStore for FileStore {
    fn insert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<bool, StoreError> {
        if self.data.contains(collection, key)? {
            return Ok(false);
        }
        self.append(&LogEntry::Put {
            collection: collection.to_string(),
            key: key.to_string(),
            document: document.clone(),
        })?;
        self.data.insert(collection, key, document)?;
        self.maybe_compact()?;
        Ok(true)
    }

    fn upsert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<Option<StoredDocument>, StoreError> {
        self.append(&LogEntry::Put {
            collection: collection.to_string(),
            key: key.to_string(),
            document: document.clone(),
        })?;
        let previous = self.data.upsert(collection, key, document)?;
        self.maybe_compact()?;
        Ok(previous)
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.data.get(collection, key)
    }

    fn remove(
        &mut self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        if !self.data.contains(collection, key)? {
            return Ok(None);
        }
        self.append(&LogEntry::Remove {
            collection: collection.to_string(),
            key: key.to_string(),
        })?;
        let removed = self.data.remove(collection, key)?;
        self.maybe_compact()?;
        Ok(removed)
    }

    fn documents(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        self.data.documents(collection)
    }

    fn contains(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        self.data.contains(collection, key)
    }

    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.data.count(collection)
    }

    fn collection_names(&self) -> Vec<String> {
        self.data.collection_names()
    }

    fn export_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(&self.path)?)
    }

    fn compact(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        self.data.compact()?;

        let image = encode_image(self.data.collections(), self.compression_level)?;
        write_image(&self.path, &image)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);

        tracing::info!(
            "Compacted {} ({} log frames folded, {} bytes)",
            self.path.display(),
            self.pending_frames,
            image.len()
        );
        self.pending_frames = 0;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// 经临时文件原子替换目标文件
fn write_image(path: &Path, image: &[u8]) -> Result<(), StoreError> {
    let mut tmp_path = path.as_os_str().to_os_string();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let write_result = (|| -> Result<(), std::io::Error> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(image)?;
        file.sync_all()
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error.into());
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}
