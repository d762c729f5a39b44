use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use jtrace_jdwp::signature::signature_to_type_name;
use jtrace_jdwp::{
    FieldInfo, JdwpClient, JdwpError, LineTable, Location, MethodId, MethodInfo,
    ReferenceTypeId, Result, VariableInfo,
};

/// Session-scoped cache of reference type metadata.
///
/// Type ids stay valid for as long as the class is loaded, and program
/// classes are never unloaded during a trace.
pub(crate) struct Mirror {
    client: JdwpClient,
    signatures: HashMap<ReferenceTypeId, String>,
    methods: HashMap<ReferenceTypeId, Vec<MethodInfo>>,
    fields: HashMap<ReferenceTypeId, Vec<FieldInfo>>,
    line_tables: HashMap<(ReferenceTypeId, MethodId), Option<LineTable>>,
    variable_tables: HashMap<(ReferenceTypeId, MethodId), Option<Vec<VariableInfo>>>,
    superclasses: HashMap<ReferenceTypeId, Option<ReferenceTypeId>>,
    interface_names: HashMap<ReferenceTypeId, Arc<BTreeSet<String>>>,
}

impl Mirror {
    pub(crate) fn new(client: JdwpClient) -> Self {
        Self {
            client,
            signatures: HashMap::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            line_tables: HashMap::new(),
            variable_tables: HashMap::new(),
            superclasses: HashMap::new(),
            interface_names: HashMap::new(),
        }
    }

    pub(crate) fn client(&self) -> &JdwpClient {
        &self.client
    }

    pub(crate) async fn signature(&mut self, type_id: ReferenceTypeId) -> Result<String> {
        if let Some(signature) = self.signatures.get(&type_id) {
            return Ok(signature.clone());
        }
        let signature = self.client.reference_type_signature(type_id).await?;
        self.signatures.insert(type_id, signature.clone());
        Ok(signature)
    }

    /// `Lpkg/Outer$Inner;` → `pkg.Outer$Inner`.
    pub(crate) async fn type_name(&mut self, type_id: ReferenceTypeId) -> Result<String> {
        let signature = self.signature(type_id).await?;
        Ok(signature_to_type_name(&signature))
    }

    pub(crate) async fn methods(&mut self, type_id: ReferenceTypeId) -> Result<Vec<MethodInfo>> {
        if let Some(methods) = self.methods.get(&type_id) {
            return Ok(methods.clone());
        }
        let methods = self.client.reference_type_methods(type_id).await?;
        self.methods.insert(type_id, methods.clone());
        Ok(methods)
    }

    pub(crate) async fn method(
        &mut self,
        type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<Option<MethodInfo>> {
        Ok(self
            .methods(type_id)
            .await?
            .into_iter()
            .find(|method| method.method_id == method_id))
    }

    /// Fields declared directly on `type_id`, in declaration order.
    pub(crate) async fn fields(&mut self, type_id: ReferenceTypeId) -> Result<Vec<FieldInfo>> {
        if let Some(fields) = self.fields.get(&type_id) {
            return Ok(fields.clone());
        }
        let fields = self.client.reference_type_fields(type_id).await?;
        self.fields.insert(type_id, fields.clone());
        Ok(fields)
    }

    /// `None` for native/abstract methods and classes compiled without `-g`.
    pub(crate) async fn line_table(
        &mut self,
        type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<Option<LineTable>> {
        if let Some(table) = self.line_tables.get(&(type_id, method_id)) {
            return Ok(table.clone());
        }
        let table = match self.client.method_line_table(type_id, method_id).await {
            Ok(table) => Some(table),
            Err(JdwpError::VmError(code)) => {
                tracing::trace!(target: "jtrace.engine", type_id, method_id, code, "no line table");
                None
            }
            Err(err) => return Err(err),
        };
        self.line_tables.insert((type_id, method_id), table.clone());
        Ok(table)
    }

    pub(crate) async fn variables(
        &mut self,
        type_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<Option<Vec<VariableInfo>>> {
        if let Some(vars) = self.variable_tables.get(&(type_id, method_id)) {
            return Ok(vars.clone());
        }
        let vars = match self.client.method_variable_table(type_id, method_id).await {
            Ok((_arg_count, vars)) => Some(vars),
            Err(JdwpError::VmError(code)) => {
                tracing::trace!(target: "jtrace.engine", type_id, method_id, code, "no variable table");
                None
            }
            Err(err) => return Err(err),
        };
        self.variable_tables
            .insert((type_id, method_id), vars.clone());
        Ok(vars)
    }

    /// Source line of `location`, `-1` when unknown.
    pub(crate) async fn line_of(&mut self, location: &Location) -> Result<i32> {
        Ok(self
            .line_table(location.class_id, location.method_id)
            .await?
            .and_then(|table| table.line_for(location.index))
            .unwrap_or(-1))
    }

    /// Superclass of a class type. Interfaces, arrays and `java.lang.Object`
    /// have none.
    pub(crate) async fn superclass(
        &mut self,
        type_id: ReferenceTypeId,
    ) -> Result<Option<ReferenceTypeId>> {
        if let Some(superclass) = self.superclasses.get(&type_id) {
            return Ok(*superclass);
        }
        let superclass = match self.client.class_type_superclass(type_id).await {
            Ok(superclass) => superclass,
            Err(JdwpError::VmError(_)) => None,
            Err(err) => return Err(err),
        };
        self.superclasses.insert(type_id, superclass);
        Ok(superclass)
    }

    /// `type_id` followed by its superclasses, nearest first.
    pub(crate) async fn class_chain(
        &mut self,
        type_id: ReferenceTypeId,
    ) -> Result<Vec<ReferenceTypeId>> {
        let mut chain = vec![type_id];
        let mut current = type_id;
        while let Some(superclass) = self.superclass(current).await? {
            if chain.contains(&superclass) {
                break;
            }
            chain.push(superclass);
            current = superclass;
        }
        Ok(chain)
    }

    /// Names of every interface `type_id` implements, directly or through
    /// superclasses and super-interfaces.
    pub(crate) async fn interface_names(
        &mut self,
        type_id: ReferenceTypeId,
    ) -> Result<Arc<BTreeSet<String>>> {
        if let Some(names) = self.interface_names.get(&type_id) {
            return Ok(names.clone());
        }

        let mut names = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut pending = self.class_chain(type_id).await?;
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let interfaces = match self.client.reference_type_interfaces(current).await {
                Ok(interfaces) => interfaces,
                Err(JdwpError::VmError(_)) => Vec::new(),
                Err(err) => return Err(err),
            };
            for interface in interfaces {
                names.insert(self.type_name(interface).await?);
                pending.push(interface);
            }
        }

        let names = Arc::new(names);
        self.interface_names.insert(type_id, names.clone());
        Ok(names)
    }

    /// Find `name` with JNI `signature` on `type_id` or its superclasses.
    /// Returns the declaring type with the method id.
    pub(crate) async fn find_method(
        &mut self,
        type_id: ReferenceTypeId,
        name: &str,
        signature: &str,
    ) -> Result<Option<(ReferenceTypeId, MethodId)>> {
        for class in self.class_chain(type_id).await? {
            let found = self
                .methods(class)
                .await?
                .into_iter()
                .find(|method| method.name == name && method.signature == signature);
            if let Some(method) = found {
                return Ok(Some((class, method.method_id)));
            }
        }
        Ok(None)
    }

    /// Instance fields of `type_id` including inherited ones: the class's own
    /// fields first, then each superclass in turn, each in declaration order.
    /// Synthetic fields are skipped.
    pub(crate) async fn instance_fields(
        &mut self,
        type_id: ReferenceTypeId,
    ) -> Result<Vec<FieldInfo>> {
        let mut out = Vec::new();
        for class in self.class_chain(type_id).await? {
            out.extend(
                self.fields(class)
                    .await?
                    .into_iter()
                    .filter(|field| !field.is_static() && !field.is_synthetic()),
            );
        }
        Ok(out)
    }
}
