/// Read-only facts about the operand being installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperandContext {
    name: String,
    namespace: String,
    resource: String,
    image: String,
    version: String,
}

impl OperandContext {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        resource: impl Into<String>,
        image: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            resource: resource.into(),
            image: image.into(),
            version: version.into(),
        }
    }

    /// Name of the admission webhook server, used for every object installed for it.
    pub fn webhook_name(&self) -> &str {
        &self.name
    }

    /// Namespace the admission webhook server is installed into.
    pub fn webhook_namespace(&self) -> &str {
        &self.namespace
    }

    pub fn operand_image(&self) -> &str {
        &self.image
    }

    pub fn operand_version(&self) -> &str {
        &self.version
    }

    /// Name of the custom resource that manages the operand.
    pub fn resource_name(&self) -> &str {
        &self.resource
    }
}
