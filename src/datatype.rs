//! Runtime message types and their subclass relationships.
//!
//! Every message carries exactly one concrete [`Datatype`] tag. The tags form
//! a DAG of is-a relationships rooted at [`Datatype::ADatatype`], used to
//! validate link compatibility at graph-build time and to dispatch at
//! runtime: a consumer that accepts a parent type accepts any message whose
//! runtime type is a descendant of it.
//!
//! The hierarchy is fixed static data. [`is_subclass_of`] is the only query;
//! it has strict-descendant semantics (`is_subclass_of(x, x)` is false), and
//! callers wanting the reflexive closure check equality themselves.

use std::sync::Once;

/// Runtime type tag of a message.
///
/// Closed set; new kinds are added here and in [`children`], never at
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Datatype {
    /// Abstract root of the hierarchy.
    ADatatype,
    /// Generic byte buffer; parent of every concrete message kind.
    Buffer,
    /// Raw image frame.
    ImgFrame,
    /// Encoded (compressed) image frame.
    EncodedFrame,
    /// Neural network input/output tensors.
    NNData,
    /// Image manipulation configuration.
    ImageManipConfig,
    /// Camera control command.
    CameraControl,
    /// 2D object detections.
    ImgDetections,
    /// Object detections with spatial coordinates.
    SpatialImgDetections,
    /// Device system information.
    SystemInformation,
    /// Device system information (S3 variant).
    SystemInformationS3,
    /// Spatial location calculator configuration.
    SpatialLocationCalculatorConfig,
    /// Spatial location calculator results.
    SpatialLocationCalculatorData,
    /// Edge detector configuration.
    EdgeDetectorConfig,
    /// AprilTag detector configuration.
    AprilTagConfig,
    /// Detected AprilTags.
    AprilTags,
    /// Object tracker results.
    Tracklets,
    /// Inertial measurement unit samples.
    IMUData,
    /// Stereo depth configuration.
    StereoDepthConfig,
    /// Feature tracker configuration.
    FeatureTrackerConfig,
    /// Feature tracker configuration (RVC4 variant).
    FeatureTrackerConfigRvc4,
    /// Time-of-flight configuration.
    ToFConfig,
    /// Tracked 2D features.
    TrackedFeatures,
    /// Benchmark timing report.
    BenchmarkReport,
    /// Group of heterogeneous messages delivered together.
    MessageGroup,
    /// Point cloud configuration.
    PointCloudConfig,
    /// Point cloud data.
    PointCloudData,
}

/// Direct children of each datatype in the is-a DAG.
fn children(parent: Datatype) -> &'static [Datatype] {
    use Datatype::*;
    match parent {
        ADatatype => &[Buffer],
        Buffer => &[
            ImgFrame,
            EncodedFrame,
            NNData,
            ImageManipConfig,
            CameraControl,
            ImgDetections,
            SpatialImgDetections,
            SystemInformation,
            SystemInformationS3,
            SpatialLocationCalculatorConfig,
            SpatialLocationCalculatorData,
            EdgeDetectorConfig,
            Tracklets,
            IMUData,
            StereoDepthConfig,
            FeatureTrackerConfig,
            FeatureTrackerConfigRvc4,
            ToFConfig,
            TrackedFeatures,
            AprilTagConfig,
            AprilTags,
            BenchmarkReport,
            MessageGroup,
            PointCloudConfig,
            PointCloudData,
        ],
        ImgDetections => &[SpatialImgDetections],
        _ => &[],
    }
}

/// Every datatype, in declaration order. Used for the acyclicity sweep and
/// by tests that want to iterate the whole set.
pub const ALL_DATATYPES: &[Datatype] = &[
    Datatype::ADatatype,
    Datatype::Buffer,
    Datatype::ImgFrame,
    Datatype::EncodedFrame,
    Datatype::NNData,
    Datatype::ImageManipConfig,
    Datatype::CameraControl,
    Datatype::ImgDetections,
    Datatype::SpatialImgDetections,
    Datatype::SystemInformation,
    Datatype::SystemInformationS3,
    Datatype::SpatialLocationCalculatorConfig,
    Datatype::SpatialLocationCalculatorData,
    Datatype::EdgeDetectorConfig,
    Datatype::AprilTagConfig,
    Datatype::AprilTags,
    Datatype::Tracklets,
    Datatype::IMUData,
    Datatype::StereoDepthConfig,
    Datatype::FeatureTrackerConfig,
    Datatype::FeatureTrackerConfigRvc4,
    Datatype::ToFConfig,
    Datatype::TrackedFeatures,
    Datatype::BenchmarkReport,
    Datatype::MessageGroup,
    Datatype::PointCloudConfig,
    Datatype::PointCloudData,
];

/// Check whether `child` is a strict descendant of `parent`.
///
/// Depth-first search over the static adjacency table. Reflexive closure is
/// the caller's responsibility: `is_subclass_of(x, x)` is `false`.
///
/// The hierarchy table is verified acyclic once, on first call.
pub fn is_subclass_of(parent: Datatype, child: Datatype) -> bool {
    static ACYCLIC_CHECK: Once = Once::new();
    ACYCLIC_CHECK.call_once(|| {
        assert!(hierarchy_is_acyclic(), "datatype hierarchy contains a cycle");
    });

    let mut stack: Vec<Datatype> = children(parent).to_vec();
    while let Some(d) = stack.pop() {
        if d == child {
            return true;
        }
        stack.extend_from_slice(children(d));
    }
    false
}

/// Walk the table from every node, bounding the walk by the total edge
/// count; exceeding it means a node was revisited on one path, i.e. a cycle.
fn hierarchy_is_acyclic() -> bool {
    for &start in ALL_DATATYPES {
        let mut visiting = vec![start];
        let mut steps = 0usize;
        let limit = ALL_DATATYPES.len() * ALL_DATATYPES.len();
        while let Some(d) = visiting.pop() {
            steps += 1;
            if steps > limit {
                return false;
            }
            visiting.extend_from_slice(children(d));
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_reaches_all_concrete_types() {
        for &d in ALL_DATATYPES {
            if d == Datatype::ADatatype {
                continue;
            }
            assert!(
                is_subclass_of(Datatype::ADatatype, d),
                "{d:?} not reachable from root"
            );
        }
    }

    #[test]
    fn test_buffer_children() {
        assert!(is_subclass_of(Datatype::Buffer, Datatype::ImgFrame));
        assert!(is_subclass_of(Datatype::Buffer, Datatype::IMUData));
        assert!(is_subclass_of(Datatype::Buffer, Datatype::PointCloudData));
        // Transitive through ImgDetections
        assert!(is_subclass_of(
            Datatype::Buffer,
            Datatype::SpatialImgDetections
        ));
    }

    #[test]
    fn test_detections_subclass() {
        assert!(is_subclass_of(
            Datatype::ImgDetections,
            Datatype::SpatialImgDetections
        ));
        assert!(!is_subclass_of(
            Datatype::SpatialImgDetections,
            Datatype::ImgDetections
        ));
    }

    #[test]
    fn test_strict_semantics() {
        for &d in ALL_DATATYPES {
            assert!(!is_subclass_of(d, d), "{d:?} must not be its own subclass");
        }
    }

    #[test]
    fn test_no_upward_edges() {
        assert!(!is_subclass_of(Datatype::ImgFrame, Datatype::Buffer));
        assert!(!is_subclass_of(Datatype::Buffer, Datatype::ADatatype));
    }

    #[test]
    fn test_leaves_have_no_descendants() {
        for &d in ALL_DATATYPES {
            if children(d).is_empty() {
                for &other in ALL_DATATYPES {
                    assert!(!is_subclass_of(d, other));
                }
            }
        }
    }
}
