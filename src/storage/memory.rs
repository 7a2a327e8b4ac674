//! 内存对象存储，供测试注入使用

use super::{ListPage, ObjectEntry, ObjectStore, ObjectStream, DEFAULT_CONTENT_TYPE};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct MemoryStore {
    name: String,
    objects: Mutex<BTreeMap<String, Bytes>>,
    /// 服务端单页上限
    page_size: usize,
    /// 读取流的分块大小
    chunk_size: usize,
    /// 第 N 次列举调用失败
    fail_list_call: Mutex<Option<usize>>,
    /// 对象名 -> 剩余失败次数
    failing_puts: Mutex<HashMap<String, usize>>,
    stalled_puts: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    put_attempts: AtomicUsize,
    put_log: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: format!("mem://{}", name),
            objects: Mutex::new(BTreeMap::new()),
            page_size: 1000,
            chunk_size: 16,
            fail_list_call: Mutex::new(None),
            failing_puts: Mutex::new(HashMap::new()),
            stalled_puts: Mutex::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
            put_attempts: AtomicUsize::new(0),
            put_log: Mutex::new(Vec::new()),
        }
    }

    /// 填充指定大小的对象
    pub fn with_objects(self, objects: &[(&str, u64)]) -> Self {
        for (name, size) in objects {
            self.insert(name, vec![b'x'; *size as usize]);
        }
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn insert(&self, name: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), Bytes::from(data));
    }

    pub fn fail_list_on_call(&self, call: usize) {
        *self.fail_list_call.lock().unwrap() = Some(call);
    }

    pub fn fail_puts_for(&self, name: &str) {
        self.fail_next_puts(name, usize::MAX);
    }

    /// 接下来 `times` 次写入失败
    pub fn fail_next_puts(&self, name: &str, times: usize) {
        self.failing_puts
            .lock()
            .unwrap()
            .insert(name.to_string(), times);
    }

    pub fn heal_puts(&self) {
        self.failing_puts.lock().unwrap().clear();
    }

    /// 写入永远不会完成
    pub fn stall_puts_for(&self, name: &str) {
        self.stalled_puts.lock().unwrap().insert(name.to_string());
    }

    pub fn sizes(&self) -> BTreeMap<String, u64> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.len() as u64))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// 包括失败在内的写入次数
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// 成功写入的对象名，按完成顺序
    pub fn puts(&self) -> Vec<String> {
        self.put_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(&self, token: Option<&str>, limit: usize) -> Result<ListPage> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_list_call.lock().unwrap() == Some(call) {
            return Err(SyncError::Io(std::io::Error::other("list page failed")));
        }

        let limit = limit.min(self.page_size).max(1);
        let objects = self.objects.lock().unwrap();
        let mut remaining = objects
            .iter()
            .filter(|(name, _)| token.map_or(true, |t| name.as_str() > t))
            .map(|(name, data)| ObjectEntry::new(name.clone(), data.len() as u64));

        let entries: Vec<_> = remaining.by_ref().take(limit).collect();
        let next_token = if remaining.next().is_some() {
            entries.last().map(|e| e.name.clone())
        } else {
            None
        };
        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn head_size(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.get(name).map(|data| data.len() as u64))
    }

    async fn get_stream(&self, name: &str) -> Result<ObjectStream> {
        let data = self.get(name).ok_or_else(|| SyncError::ObjectNotFound {
            store: self.name.clone(),
            name: name.to_string(),
        })?;
        let chunks: Vec<Result<Bytes>> = data
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(ObjectStream {
            content_length: data.len() as u64,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            stream: futures::stream::iter(chunks).boxed(),
        })
    }

    async fn put_stream(&self, name: &str, mut body: ObjectStream, timeout: Duration) -> Result<u64> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let stalled = self.stalled_puts.lock().unwrap().contains(name);

        // 超时时不留下对象
        let receive = async {
            if stalled {
                futures::future::pending::<()>().await;
            }
            let mut data = Vec::new();
            while let Some(chunk) = body.stream.next().await {
                data.extend_from_slice(&chunk?);
            }
            Ok::<_, SyncError>(data)
        };
        let data = match tokio::time::timeout(timeout, receive).await {
            Ok(received) => received?,
            Err(_) => return Err(SyncError::Timeout { after: timeout }),
        };

        let should_fail = match self.failing_puts.lock().unwrap().get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        };
        if should_fail {
            return Err(SyncError::Io(std::io::Error::other("connection reset")));
        }

        let written = data.len() as u64;
        self.insert(name, data);
        self.put_log.lock().unwrap().push(name.to_string());
        Ok(written)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
