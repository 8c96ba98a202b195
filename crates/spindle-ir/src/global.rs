//! Global variables, storage classes, and resource bindings.

use crate::arena::Handle;
use crate::constant::Constant;
use crate::types::{AccessMode, Type};

/// Memory space a pointer or variable lives in.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum StorageClass {
    /// Function-local storage.
    Function,
    /// Module-scope private storage.
    Private,
    /// Workgroup shared storage.
    Workgroup,
    /// Uniform buffer.
    Uniform,
    /// Storage buffer; its access mode comes from an access-controlled type.
    Storage,
    /// Pipeline stage input.
    Input,
    /// Pipeline stage output.
    Output,
    /// Opaque handles (textures and samplers).
    Handle,
}

impl StorageClass {
    /// Access granted through a pointer into this class when nothing more
    /// specific is known.
    pub fn default_access(self) -> AccessMode {
        match self {
            Self::Uniform | Self::Storage | Self::Input | Self::Handle => AccessMode::Read,
            Self::Function | Self::Private | Self::Workgroup | Self::Output => {
                AccessMode::ReadWrite
            }
        }
    }

    /// Name used in canonical type names.
    pub fn name(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Private => "private",
            Self::Workgroup => "workgroup",
            Self::Uniform => "uniform",
            Self::Storage => "storage",
            Self::Input => "in",
            Self::Output => "out",
            Self::Handle => "handle",
        }
    }

    /// Spelling inside `var<...>` and `ptr<...>`.
    pub fn wgsl_name(self) -> &'static str {
        self.name()
    }

    /// Returns `true` for classes that can be declared at module scope.
    pub fn is_global(self) -> bool {
        self != Self::Function
    }
}

/// `@group(N) @binding(N)` resource binding.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ResourceBinding {
    pub group: u32,
    pub binding: u32,
}

/// Built-in shader inputs/outputs.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BuiltIn {
    /// `@builtin(position)`: vec4<f32>
    Position,
    /// `@builtin(vertex_index)`: u32
    VertexIndex,
    /// `@builtin(instance_index)`: u32
    InstanceIndex,
    /// `@builtin(front_facing)`: bool
    FrontFacing,
    /// `@builtin(frag_depth)`: f32
    FragDepth,
    /// `@builtin(sample_index)`: u32
    SampleIndex,
    /// `@builtin(sample_mask)`: u32
    SampleMask,
    /// `@builtin(global_invocation_id)`: vec3<u32>
    GlobalInvocationId,
    /// `@builtin(local_invocation_id)`: vec3<u32>
    LocalInvocationId,
    /// `@builtin(local_invocation_index)`: u32
    LocalInvocationIndex,
    /// `@builtin(workgroup_id)`: vec3<u32>
    WorkgroupId,
    /// `@builtin(num_workgroups)`: vec3<u32>
    NumWorkgroups,
}

impl BuiltIn {
    pub const ALL: [Self; 12] = [
        Self::Position,
        Self::VertexIndex,
        Self::InstanceIndex,
        Self::FrontFacing,
        Self::FragDepth,
        Self::SampleIndex,
        Self::SampleMask,
        Self::GlobalInvocationId,
        Self::LocalInvocationId,
        Self::LocalInvocationIndex,
        Self::WorkgroupId,
        Self::NumWorkgroups,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::VertexIndex => "vertex_index",
            Self::InstanceIndex => "instance_index",
            Self::FrontFacing => "front_facing",
            Self::FragDepth => "frag_depth",
            Self::SampleIndex => "sample_index",
            Self::SampleMask => "sample_mask",
            Self::GlobalInvocationId => "global_invocation_id",
            Self::LocalInvocationId => "local_invocation_id",
            Self::LocalInvocationIndex => "local_invocation_index",
            Self::WorkgroupId => "workgroup_id",
            Self::NumWorkgroups => "num_workgroups",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// A binding for a function argument, result or stage IO global.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Binding {
    /// A built-in shader variable.
    BuiltIn(BuiltIn),
    /// A user-defined location.
    Location { location: u32 },
}

/// A module-scope variable.
#[derive(Clone, Debug)]
pub struct GlobalVariable {
    pub name: String,
    pub space: StorageClass,
    /// Type of the stored value. Storage buffers are always
    /// access-controlled.
    pub ty: Handle<Type>,
    /// Pointer type of a reference to this variable.
    pub pointer_ty: Handle<Type>,
    pub init: Option<Handle<Constant>>,
    pub binding: Option<ResourceBinding>,
    /// Location or builtin of stage IO variables.
    pub io: Option<Binding>,
}

/// Description used to declare a global variable.
#[derive(Clone, Debug)]
pub struct GlobalDecl {
    pub name: String,
    pub space: StorageClass,
    pub ty: Handle<Type>,
    pub init: Option<Handle<Constant>>,
    pub binding: Option<ResourceBinding>,
    pub io: Option<Binding>,
}

impl GlobalDecl {
    pub fn new(name: impl Into<String>, space: StorageClass, ty: Handle<Type>) -> Self {
        Self {
            name: name.into(),
            space,
            ty,
            init: None,
            binding: None,
            io: None,
        }
    }

    pub fn init(mut self, init: Handle<Constant>) -> Self {
        self.init = Some(init);
        self
    }

    pub fn binding(mut self, group: u32, binding: u32) -> Self {
        self.binding = Some(ResourceBinding { group, binding });
        self
    }

    pub fn io(mut self, io: Binding) -> Self {
        self.io = Some(io);
        self
    }
}

impl GlobalVariable {
    /// Access mode of references to this variable.
    pub fn access(&self, types: &crate::TypeInterner) -> AccessMode {
        match types[self.pointer_ty] {
            Type::Pointer { access, .. } => access,
            _ => self.space.default_access(),
        }
    }
}
