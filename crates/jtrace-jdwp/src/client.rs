use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use super::{
    codec::{
        encode_command, signature_to_tag, JdwpReader, JdwpWriter, COMPOSITE_COMMAND,
        COMPOSITE_COMMAND_SET, FLAG_REPLY, HANDSHAKE, HEADER_LEN,
    },
    types::{
        ClassInfo, EventSet, FieldId, FieldInfo, FrameId, FrameInfo, InvokeResult, JdwpError,
        JdwpEvent, JdwpIdSizes, JdwpValue, LineTable, LineTableEntry, Location, MethodId,
        MethodInfo, ObjectId, ReferenceTypeId, Result, ThreadId, VariableInfo,
        EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE, EVENT_KIND_METHOD_EXIT,
        EVENT_KIND_VM_DEATH, EVENT_KIND_VM_START, EVENT_MODIFIER_KIND_CLASS_EXCLUDE,
        EVENT_MODIFIER_KIND_CLASS_MATCH, EVENT_MODIFIER_KIND_CLASS_ONLY, EVENT_MODIFIER_KIND_COUNT,
        EVENT_MODIFIER_KIND_LOCATION_ONLY,
    },
    MAX_JDWP_PACKET_BYTES,
};

/// Receiving end of the client's event stream. Yields `None` once the
/// connection is gone.
pub type EventReceiver = mpsc::UnboundedReceiver<EventSet>;

#[derive(Debug, Clone)]
pub struct JdwpClientConfig {
    pub handshake_timeout: Duration,
    /// Optional bound on each command reply. `None` waits indefinitely.
    pub reply_timeout: Option<Duration>,
}

impl Default for JdwpClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            reply_timeout: None,
        }
    }
}

#[derive(Debug)]
struct Reply {
    error_code: u16,
    payload: Vec<u8>,
}

type PendingReplies = HashMap<u32, oneshot::Sender<std::result::Result<Reply, JdwpError>>>;

#[derive(Debug)]
struct Inner {
    writer: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    pending: Mutex<PendingReplies>,
    next_id: AtomicU32,
    id_sizes: Mutex<JdwpIdSizes>,
    events: parking_lot::Mutex<Option<EventReceiver>>,
    shutdown: CancellationToken,
    config: JdwpClientConfig,
}

#[derive(Clone)]
pub struct JdwpClient {
    inner: Arc<Inner>,
}

impl JdwpClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, JdwpClientConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: JdwpClientConfig) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);

        tokio::time::timeout(config.handshake_timeout, stream.write_all(HANDSHAKE))
            .await
            .map_err(|_| JdwpError::Timeout)??;

        let mut handshake = [0u8; HANDSHAKE.len()];
        tokio::time::timeout(config.handshake_timeout, stream.read_exact(&mut handshake))
            .await
            .map_err(|_| JdwpError::Timeout)??;

        if handshake != *HANDSHAKE {
            return Err(JdwpError::Protocol(format!(
                "invalid handshake reply: {:?}",
                String::from_utf8_lossy(&handshake)
            )));
        }

        let (reader, writer) = stream.into_split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            id_sizes: Mutex::new(JdwpIdSizes::default()),
            events: parking_lot::Mutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone(), events_tx));

        let client = Self { inner };
        // ID sizes are required for correct parsing of most replies/events.
        let sizes = client.idsizes().await?;
        tracing::debug!(target: "jtrace.jdwp", %addr, ?sizes, "connected to JDWP agent");

        Ok(client)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// A token cancelled when the client shuts down, either explicitly via
    /// [`JdwpClient::shutdown`] or because the connection closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Take the event stream. There is exactly one consumer; later calls
    /// return `None`.
    pub fn take_events(&self) -> Option<EventReceiver> {
        self.inner.events.lock().take()
    }

    async fn send_command_raw(
        &self,
        command_set: u8,
        command: u8,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(id, tx);
        }

        tracing::trace!(target: "jtrace.jdwp", id, command_set, command, len = payload.len(), "send command");
        let packet = encode_command(id, command_set, command, &payload);
        {
            let mut writer = self.inner.writer.lock().await;
            writer.write_all(&packet).await?;
        }

        let reply = tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                self.remove_pending(id).await;
                return Err(JdwpError::Cancelled);
            }
            res = wait_reply(rx, self.inner.config.reply_timeout) => {
                if matches!(res, Err(JdwpError::Timeout)) {
                    self.remove_pending(id).await;
                }
                res
            }
        }?;

        if reply.error_code != 0 {
            return Err(JdwpError::VmError(reply.error_code));
        }

        Ok(reply.payload)
    }

    async fn remove_pending(&self, id: u32) {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(&id);
    }

    async fn id_sizes(&self) -> JdwpIdSizes {
        *self.inner.id_sizes.lock().await
    }

    /// VirtualMachine.IDSizes (1, 7)
    pub async fn idsizes(&self) -> Result<JdwpIdSizes> {
        let payload = self.send_command_raw(1, 7, Vec::new()).await?;
        let mut r = JdwpReader::new(&payload);
        let sizes = JdwpIdSizes {
            field_id: r.read_u32()? as usize,
            method_id: r.read_u32()? as usize,
            object_id: r.read_u32()? as usize,
            reference_type_id: r.read_u32()? as usize,
            frame_id: r.read_u32()? as usize,
        };
        *self.inner.id_sizes.lock().await = sizes;
        Ok(sizes)
    }

    /// VirtualMachine.ClassesBySignature (1, 2)
    pub async fn classes_by_signature(&self, signature: &str) -> Result<Vec<ClassInfo>> {
        let mut w = JdwpWriter::new();
        w.write_string(signature);
        let payload = self.send_command_raw(1, 2, w.into_vec()).await?;
        let sizes = self.id_sizes().await;
        let mut r = JdwpReader::new(&payload);

        let count = r.read_u32()? as usize;
        let mut classes = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            classes.push(ClassInfo {
                ref_type_tag: r.read_u8()?,
                type_id: r.read_reference_type_id(&sizes)?,
                signature: signature.to_string(),
                status: r.read_u32()?,
            });
        }
        Ok(classes)
    }

    /// VirtualMachine.Dispose (1, 6)
    pub async fn vm_dispose(&self) -> Result<()> {
        let _ = self.send_command_raw(1, 6, Vec::new()).await?;
        Ok(())
    }

    /// VirtualMachine.Resume (1, 9)
    pub async fn vm_resume(&self) -> Result<()> {
        let _ = self.send_command_raw(1, 9, Vec::new()).await?;
        Ok(())
    }

    /// ReferenceType.Signature (2, 1)
    pub async fn reference_type_signature(&self, class_id: ReferenceTypeId) -> Result<String> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(2, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        r.read_string()
    }

    /// ReferenceType.Fields (2, 4): declared fields only, in declaration order.
    pub async fn reference_type_fields(&self, class_id: ReferenceTypeId) -> Result<Vec<FieldInfo>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(2, 4, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut fields = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            fields.push(FieldInfo {
                field_id: r.read_id(sizes.field_id)?,
                name: r.read_string()?,
                signature: r.read_string()?,
                mod_bits: r.read_u32()?,
            });
        }
        Ok(fields)
    }

    /// ReferenceType.Methods (2, 5)
    pub async fn reference_type_methods(
        &self,
        class_id: ReferenceTypeId,
    ) -> Result<Vec<MethodInfo>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(2, 5, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut methods = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            methods.push(MethodInfo {
                method_id: r.read_id(sizes.method_id)?,
                name: r.read_string()?,
                signature: r.read_string()?,
                mod_bits: r.read_u32()?,
            });
        }
        Ok(methods)
    }

    /// ReferenceType.GetValues (2, 6): values of static fields.
    pub async fn reference_type_get_values(
        &self,
        class_id: ReferenceTypeId,
        field_ids: &[FieldId],
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        w.write_u32(field_ids.len() as u32);
        for field_id in field_ids {
            w.write_id(*field_id, sizes.field_id);
        }
        let payload = self.send_command_raw(2, 6, w.into_vec()).await?;
        read_tagged_values(&payload, &sizes)
    }

    /// ReferenceType.Interfaces (2, 10): directly implemented interfaces.
    pub async fn reference_type_interfaces(
        &self,
        class_id: ReferenceTypeId,
    ) -> Result<Vec<ReferenceTypeId>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(2, 10, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut interfaces = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            interfaces.push(r.read_reference_type_id(&sizes)?);
        }
        Ok(interfaces)
    }

    /// ClassType.Superclass (3, 1). `None` for `java.lang.Object` and interfaces.
    pub async fn class_type_superclass(
        &self,
        class_id: ReferenceTypeId,
    ) -> Result<Option<ReferenceTypeId>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(3, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let superclass = r.read_reference_type_id(&sizes)?;
        Ok((superclass != 0).then_some(superclass))
    }

    /// Method.LineTable (6, 1)
    pub async fn method_line_table(
        &self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<LineTable> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        let payload = self.send_command_raw(6, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let start = r.read_u64()?;
        let end = r.read_u64()?;
        let count = r.read_u32()? as usize;
        let mut lines = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            lines.push(LineTableEntry {
                code_index: r.read_u64()?,
                line: r.read_i32()?,
            });
        }
        Ok(LineTable { start, end, lines })
    }

    /// Method.VariableTable (6, 2). Returns the argument slot count and the
    /// table.
    pub async fn method_variable_table(
        &self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<(u32, Vec<VariableInfo>)> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        let payload = self.send_command_raw(6, 2, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let arg_count = r.read_u32()?;
        let count = r.read_u32()? as usize;
        let mut vars = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            vars.push(VariableInfo {
                code_index: r.read_u64()?,
                name: r.read_string()?,
                signature: r.read_string()?,
                length: r.read_u32()?,
                slot: r.read_u32()?,
            });
        }
        Ok((arg_count, vars))
    }

    /// ObjectReference.ReferenceType (9, 1)
    pub async fn object_reference_reference_type(
        &self,
        object_id: ObjectId,
    ) -> Result<ReferenceTypeId> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(object_id, &sizes);
        let payload = self.send_command_raw(9, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let _ref_type_tag = r.read_u8()?;
        r.read_reference_type_id(&sizes)
    }

    /// ObjectReference.GetValues (9, 2)
    pub async fn object_reference_get_values(
        &self,
        object_id: ObjectId,
        field_ids: &[FieldId],
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(object_id, &sizes);
        w.write_u32(field_ids.len() as u32);
        for field_id in field_ids {
            w.write_id(*field_id, sizes.field_id);
        }
        let payload = self.send_command_raw(9, 2, w.into_vec()).await?;
        read_tagged_values(&payload, &sizes)
    }

    /// ObjectReference.InvokeMethod (9, 6)
    ///
    /// `thread` must be suspended by an event. The caller decides how to treat
    /// a non-zero [`InvokeResult::exception`].
    pub async fn object_reference_invoke_method(
        &self,
        object_id: ObjectId,
        thread: ThreadId,
        class_id: ReferenceTypeId,
        method_id: MethodId,
        args: &[JdwpValue],
        options: u32,
    ) -> Result<InvokeResult> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(object_id, &sizes);
        w.write_object_id(thread, &sizes);
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        w.write_u32(args.len() as u32);
        for arg in args {
            w.write_tagged_value(arg, &sizes);
        }
        w.write_u32(options);
        let payload = self.send_command_raw(9, 6, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let value = r.read_tagged_value(&sizes)?;
        let (_tag, exception) = r.read_tagged_object_id(&sizes)?;
        Ok(InvokeResult { value, exception })
    }

    /// StringReference.Value (10, 1)
    pub async fn string_reference_value(&self, string_id: ObjectId) -> Result<String> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(string_id, &sizes);
        let payload = self.send_command_raw(10, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        r.read_string()
    }

    /// ThreadReference.Frames (11, 6). Frames come back top (current) first.
    pub async fn frames(&self, thread: ThreadId, start: i32, length: i32) -> Result<Vec<FrameInfo>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(thread, &sizes);
        w.write_i32(start);
        w.write_i32(length);
        let payload = self.send_command_raw(11, 6, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut frames = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            let frame_id = r.read_id(sizes.frame_id)?;
            let location = r.read_location(&sizes)?;
            frames.push(FrameInfo { frame_id, location });
        }
        Ok(frames)
    }

    /// ArrayReference.Length (13, 1)
    pub async fn array_reference_length(&self, array_id: ObjectId) -> Result<i32> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(array_id, &sizes);
        let payload = self.send_command_raw(13, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        r.read_i32()
    }

    /// ArrayReference.GetValues (13, 2)
    pub async fn array_reference_get_values(
        &self,
        array_id: ObjectId,
        first_index: i32,
        length: i32,
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(array_id, &sizes);
        w.write_i32(first_index);
        w.write_i32(length);
        let payload = self.send_command_raw(13, 2, w.into_vec()).await?;
        JdwpReader::new(&payload).read_array_region(&sizes)
    }

    /// EventRequest.Set (15, 1)
    pub async fn event_request_set(
        &self,
        event_kind: u8,
        suspend_policy: u8,
        modifiers: Vec<EventModifier>,
    ) -> Result<i32> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_u8(event_kind);
        w.write_u8(suspend_policy);
        w.write_u32(modifiers.len() as u32);
        for modifier in modifiers {
            modifier.encode(&mut w, &sizes);
        }
        let payload = self.send_command_raw(15, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        r.read_i32()
    }

    /// EventRequest.Clear (15, 2)
    pub async fn event_request_clear(&self, event_kind: u8, request_id: i32) -> Result<()> {
        let mut w = JdwpWriter::new();
        w.write_u8(event_kind);
        w.write_i32(request_id);
        let _ = self.send_command_raw(15, 2, w.into_vec()).await?;
        Ok(())
    }

    /// StackFrame.GetValues (16, 1). `slots` pairs a slot with the variable's
    /// signature; only its first byte (the tag) goes on the wire.
    pub async fn stack_frame_get_values(
        &self,
        thread: ThreadId,
        frame_id: FrameId,
        slots: &[(u32, String)],
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(thread, &sizes);
        w.write_id(frame_id, sizes.frame_id);
        w.write_u32(slots.len() as u32);
        for (slot, signature) in slots {
            w.write_u32(*slot);
            w.write_u8(signature_to_tag(signature));
        }
        let payload = self.send_command_raw(16, 1, w.into_vec()).await?;
        read_tagged_values(&payload, &sizes)
    }

    /// StackFrame.ThisObject (16, 3). `None` for static and native frames.
    pub async fn stack_frame_this_object(
        &self,
        thread: ThreadId,
        frame_id: FrameId,
    ) -> Result<Option<ObjectId>> {
        let sizes = self.id_sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(thread, &sizes);
        w.write_id(frame_id, sizes.frame_id);
        let payload = self.send_command_raw(16, 3, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let (_tag, id) = r.read_tagged_object_id(&sizes)?;
        Ok((id != 0).then_some(id))
    }
}

async fn wait_reply(
    rx: oneshot::Receiver<std::result::Result<Reply, JdwpError>>,
    timeout: Option<Duration>,
) -> Result<Reply> {
    let received = match timeout {
        Some(limit) => tokio::time::timeout(limit, rx)
            .await
            .map_err(|_elapsed| JdwpError::Timeout)?,
        None => rx.await,
    };
    received.map_err(|_closed| JdwpError::ConnectionClosed)?
}

fn read_tagged_values(payload: &[u8], sizes: &JdwpIdSizes) -> Result<Vec<JdwpValue>> {
    let mut r = JdwpReader::new(payload);
    let count = r.read_u32()? as usize;
    let mut values = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        values.push(r.read_tagged_value(sizes)?);
    }
    Ok(values)
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventModifier {
    Count { count: i32 },
    ClassOnly { class_id: ReferenceTypeId },
    /// Restrict to classes whose name matches `pattern`; a leading or
    /// trailing `*` is a wildcard.
    ClassMatch { pattern: String },
    ClassExclude { pattern: String },
    LocationOnly { location: Location },
}

impl EventModifier {
    fn encode(self, w: &mut JdwpWriter, sizes: &JdwpIdSizes) {
        match self {
            EventModifier::Count { count } => {
                w.write_u8(EVENT_MODIFIER_KIND_COUNT);
                w.write_i32(count);
            }
            EventModifier::ClassOnly { class_id } => {
                w.write_u8(EVENT_MODIFIER_KIND_CLASS_ONLY);
                w.write_reference_type_id(class_id, sizes);
            }
            EventModifier::ClassMatch { pattern } => {
                w.write_u8(EVENT_MODIFIER_KIND_CLASS_MATCH);
                w.write_string(&pattern);
            }
            EventModifier::ClassExclude { pattern } => {
                w.write_u8(EVENT_MODIFIER_KIND_CLASS_EXCLUDE);
                w.write_string(&pattern);
            }
            EventModifier::LocationOnly { location } => {
                w.write_u8(EVENT_MODIFIER_KIND_LOCATION_ONLY);
                w.write_location(&location, sizes);
            }
        }
    }
}

async fn read_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    inner: Arc<Inner>,
    events: mpsc::UnboundedSender<EventSet>,
) {
    let mut terminated_with_error = false;

    loop {
        let mut header = [0u8; HEADER_LEN];
        let header_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_exact(&mut header) => res,
        };
        if let Err(err) = header_read {
            tracing::debug!(target: "jtrace.jdwp", error = %err, "JDWP connection ended");
            terminated_with_error = true;
            break;
        }

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if !(HEADER_LEN..=MAX_JDWP_PACKET_BYTES).contains(&length) {
            tracing::warn!(target: "jtrace.jdwp", length, "invalid JDWP packet length");
            terminated_with_error = true;
            break;
        }

        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let flags = header[8];
        let mut payload = vec![0u8; length - HEADER_LEN];
        let payload_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_exact(&mut payload) => res,
        };
        if payload_read.is_err() {
            terminated_with_error = true;
            break;
        }

        if (flags & FLAG_REPLY) != 0 {
            let error_code = u16::from_be_bytes([header[9], header[10]]);
            let tx = {
                let mut pending = inner.pending.lock().await;
                pending.remove(&id)
            };

            if let Some(tx) = tx {
                let _ = tx.send(Ok(Reply {
                    error_code,
                    payload,
                }));
            }
        } else if header[9] == COMPOSITE_COMMAND_SET && header[10] == COMPOSITE_COMMAND {
            let sizes = *inner.id_sizes.lock().await;
            match parse_event_packet(&payload, &sizes) {
                Ok(set) => {
                    tracing::trace!(target: "jtrace.jdwp", ?set, "event batch");
                    let _ = events.send(set);
                }
                Err(err) => {
                    tracing::warn!(target: "jtrace.jdwp", error = %err, "malformed event packet");
                    terminated_with_error = true;
                    break;
                }
            }
        } else {
            // Other VM->debugger commands are not part of the protocol subset we speak.
            tracing::trace!(target: "jtrace.jdwp", command_set = header[9], command = header[10], "ignoring command packet");
        }
    }

    inner.shutdown.cancel();
    drop(events);

    if terminated_with_error {
        let pending = {
            let mut pending = inner.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        for (_id, tx) in pending {
            let _ = tx.send(Err(JdwpError::ConnectionClosed));
        }
    }
}

/// Decode a composite event packet. Events of kinds outside the supported
/// set end the batch early since their payload length is unknown.
fn parse_event_packet(payload: &[u8], sizes: &JdwpIdSizes) -> Result<EventSet> {
    let mut r = JdwpReader::new(payload);
    let suspend_policy = r.read_u8()?;
    let event_count = r.read_u32()? as usize;
    let mut events = Vec::with_capacity(event_count.min(r.remaining()));
    for _ in 0..event_count {
        let kind = r.read_u8()?;
        let request_id = r.read_i32()?;
        let event = match kind {
            EVENT_KIND_BREAKPOINT => JdwpEvent::Breakpoint {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
            },
            EVENT_KIND_METHOD_EXIT => JdwpEvent::MethodExit {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
            },
            EVENT_KIND_CLASS_PREPARE => JdwpEvent::ClassPrepare {
                request_id,
                thread: r.read_object_id(sizes)?,
                ref_type_tag: r.read_u8()?,
                type_id: r.read_reference_type_id(sizes)?,
                signature: r.read_string()?,
                status: r.read_u32()?,
            },
            EVENT_KIND_VM_START => JdwpEvent::VmStart {
                request_id,
                thread: r.read_object_id(sizes)?,
            },
            EVENT_KIND_VM_DEATH => JdwpEvent::VmDeath { request_id },
            other => {
                tracing::debug!(target: "jtrace.jdwp", kind = other, "unsupported event kind");
                break;
            }
        };
        events.push(event);
    }
    Ok(EventSet {
        suspend_policy,
        events,
    })
}
