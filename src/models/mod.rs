pub mod assignment;
pub mod attendance;
pub mod ids;
pub mod interval;
pub mod schedule;
pub mod status;
pub mod user;

pub use assignment::{
    AssignmentQuery, CourseTermQuery, InstructorResolution, LecturerAssignment,
    NewAssignmentRequest, UpdateAssignmentRequest,
};
pub use attendance::{
    AttendanceHistoryEntry, AttendanceSession, AttendanceStatistics, CheckInOutcome,
    CheckInProof, FaceCheckInRequest, FaceMatch, MarkAttendanceRequest, OpenSessionRequest,
    QrCheckInRequest, QrPayload, SessionDetail, SessionRangeQuery, SessionSettings,
    StudentAttendance,
};
pub use ids::{DbId, RawId};
pub use interval::{ClockTime, IntervalError, TimeInterval, Weekday};
pub use schedule::{
    ConflictCandidate, ConflictCheckRequest, ConflictFlags, CourseSchedule, NewScheduleRequest,
    ScheduleDraft, ScheduleFilter, UpdateScheduleRequest,
};
pub use status::{AttendanceStatus, Role, SessionStatus, VerificationType};
pub use user::{Actor, CatalogKind, GrantAssistantRequest, User};
