//! Interface definitions compiled into the bridge.
//!
//! These cover the common message, service and action packages so a bridge
//! with no schema directories configured can still carry everyday traffic.

use crate::schema::InterfaceKind;

pub struct BuiltinDefinition {
    pub package: &'static str,
    pub kind: InterfaceKind,
    pub name: &'static str,
    pub text: &'static str,
}

const fn msg(package: &'static str, name: &'static str, text: &'static str) -> BuiltinDefinition {
    BuiltinDefinition {
        package,
        kind: InterfaceKind::Msg,
        name,
        text,
    }
}

const fn srv(package: &'static str, name: &'static str, text: &'static str) -> BuiltinDefinition {
    BuiltinDefinition {
        package,
        kind: InterfaceKind::Srv,
        name,
        text,
    }
}

const fn action(
    package: &'static str,
    name: &'static str,
    text: &'static str,
) -> BuiltinDefinition {
    BuiltinDefinition {
        package,
        kind: InterfaceKind::Action,
        name,
        text,
    }
}

pub const BUILTIN: &[BuiltinDefinition] = &[
    // builtin_interfaces
    msg("builtin_interfaces", "Time", "int32 sec\nuint32 nanosec\n"),
    msg("builtin_interfaces", "Duration", "int32 sec\nuint32 nanosec\n"),
    // std_msgs
    msg(
        "std_msgs",
        "Header",
        "builtin_interfaces/Time stamp\nstring frame_id\n",
    ),
    msg("std_msgs", "Empty", ""),
    msg("std_msgs", "Bool", "bool data\n"),
    msg("std_msgs", "Byte", "byte data\n"),
    msg("std_msgs", "Char", "char data\n"),
    msg("std_msgs", "String", "string data\n"),
    msg("std_msgs", "Int8", "int8 data\n"),
    msg("std_msgs", "Int16", "int16 data\n"),
    msg("std_msgs", "Int32", "int32 data\n"),
    msg("std_msgs", "Int64", "int64 data\n"),
    msg("std_msgs", "UInt8", "uint8 data\n"),
    msg("std_msgs", "UInt16", "uint16 data\n"),
    msg("std_msgs", "UInt32", "uint32 data\n"),
    msg("std_msgs", "UInt64", "uint64 data\n"),
    msg("std_msgs", "Float32", "float32 data\n"),
    msg("std_msgs", "Float64", "float64 data\n"),
    msg(
        "std_msgs",
        "ColorRGBA",
        "float32 r\nfloat32 g\nfloat32 b\nfloat32 a\n",
    ),
    // geometry_msgs
    msg(
        "geometry_msgs",
        "Vector3",
        "float64 x\nfloat64 y\nfloat64 z\n",
    ),
    msg("geometry_msgs", "Point", "float64 x\nfloat64 y\nfloat64 z\n"),
    msg(
        "geometry_msgs",
        "Point32",
        "float32 x\nfloat32 y\nfloat32 z\n",
    ),
    msg(
        "geometry_msgs",
        "Quaternion",
        "float64 x 0\nfloat64 y 0\nfloat64 z 0\nfloat64 w 1\n",
    ),
    msg(
        "geometry_msgs",
        "Pose",
        "Point position\nQuaternion orientation\n",
    ),
    msg("geometry_msgs", "Pose2D", "float64 x\nfloat64 y\nfloat64 theta\n"),
    msg("geometry_msgs", "PoseStamped", "std_msgs/Header header\nPose pose\n"),
    msg(
        "geometry_msgs",
        "PoseArray",
        "std_msgs/Header header\nPose[] poses\n",
    ),
    msg("geometry_msgs", "Polygon", "Point32[] points\n"),
    msg("geometry_msgs", "Twist", "Vector3 linear\nVector3 angular\n"),
    msg(
        "geometry_msgs",
        "TwistStamped",
        "std_msgs/Header header\nTwist twist\n",
    ),
    // sensor_msgs
    msg(
        "sensor_msgs",
        "Temperature",
        "std_msgs/Header header\nfloat64 temperature\nfloat64 variance\n",
    ),
    msg(
        "sensor_msgs",
        "JointState",
        "std_msgs/Header header\n\
         string[] name\n\
         float64[] position\n\
         float64[] velocity\n\
         float64[] effort\n",
    ),
    msg(
        "sensor_msgs",
        "BatteryState",
        "uint8 POWER_SUPPLY_STATUS_UNKNOWN = 0\n\
         uint8 POWER_SUPPLY_STATUS_CHARGING = 1\n\
         uint8 POWER_SUPPLY_STATUS_DISCHARGING = 2\n\
         std_msgs/Header header\n\
         float32 voltage\n\
         float32 temperature\n\
         float32 current\n\
         float32 charge\n\
         float32 capacity\n\
         float32 design_capacity\n\
         float32 percentage\n\
         uint8 power_supply_status\n\
         uint8 power_supply_health\n\
         uint8 power_supply_technology\n\
         bool present\n\
         float32[] cell_voltage\n\
         float32[] cell_temperature\n\
         string location\n\
         string serial_number\n",
    ),
    // rcl_interfaces
    msg(
        "rcl_interfaces",
        "Log",
        "byte DEBUG=10\n\
         byte INFO=20\n\
         byte WARN=30\n\
         byte ERROR=40\n\
         byte FATAL=50\n\
         builtin_interfaces/Time stamp\n\
         uint8 level\n\
         string name\n\
         string msg\n\
         string file\n\
         string function\n\
         uint32 line\n",
    ),
    // std_srvs
    srv("std_srvs", "Empty", "---\n"),
    srv("std_srvs", "Trigger", "---\nbool success\nstring message\n"),
    srv(
        "std_srvs",
        "SetBool",
        "bool data # e.g. for hardware enabling / disabling\n---\nbool success\nstring message\n",
    ),
    // example_interfaces
    srv(
        "example_interfaces",
        "AddTwoInts",
        "int64 a\nint64 b\n---\nint64 sum\n",
    ),
    action(
        "example_interfaces",
        "Fibonacci",
        "int32 order\n---\nint32[] sequence\n---\nint32[] sequence\n",
    ),
];
