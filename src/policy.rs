//! Access Policy Engine.
//!
//! Pure, storage-free authorization. Each (resource, action) pair maps to a
//! static list of relations, any one of which grants the action. Relations
//! that depend on the ownership tree are evaluated lazily against an
//! `Ancestry` view the caller resolves beforehand, so a decision here is a
//! handful of set-membership tests and never a query.

use uuid::Uuid;

use crate::models::{Course, Role};

/// Principal
///
/// The acting identity: resolved once per request by the auth layer and
/// passed explicitly through the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

/// Action
///
/// The five CRUD verbs. `List` and `Retrieve` share rules everywhere but are
/// kept distinct so scoped listings and direct gets stay independently
/// auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    List,
    Retrieve,
    Update,
    Delete,
}

/// Resource
///
/// Every entity type the policy table covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Course,
    Lecture,
    Homework,
    HomeworkInstance,
    InstanceMark,
    InstanceComment,
}

impl Resource {
    /// Noun used in not-found messages.
    pub fn noun(&self) -> &'static str {
        match self {
            Resource::Course => "course",
            Resource::Lecture => "lecture",
            Resource::Homework => "homework",
            Resource::HomeworkInstance => "homework instance",
            Resource::InstanceMark => "mark",
            Resource::InstanceComment => "comment",
        }
    }
}

/// Relation
///
/// A single grant predicate. Role-only relations need no ancestry; the rest
/// walk the resolved ancestry view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Holds the superuser role.
    Superuser,
    /// Holds the teacher role (no ownership requirement).
    Teacher,
    /// Teacher listed on the ancestry course.
    CourseTeacher,
    /// Student enrolled in the ancestry course.
    CourseStudent,
    /// Student owning the ancestry homework instance.
    InstanceOwner,
    /// Author of the target comment.
    CommentAuthor,
}

/// Ancestry
///
/// The ownership context a relation is tested against: the root course
/// (with its membership sets), plus the owning student for instance-rooted
/// entities and the author for comments.
#[derive(Debug, Clone, Copy)]
pub struct Ancestry<'a> {
    pub course: &'a Course,
    pub instance_student: Option<Uuid>,
    pub comment_author: Option<Uuid>,
}

impl<'a> Ancestry<'a> {
    pub fn course(course: &'a Course) -> Self {
        Self {
            course,
            instance_student: None,
            comment_author: None,
        }
    }

    pub fn instance(course: &'a Course, student: Uuid) -> Self {
        Self {
            course,
            instance_student: Some(student),
            comment_author: None,
        }
    }

    pub fn comment(course: &'a Course, student: Uuid, author: Uuid) -> Self {
        Self {
            course,
            instance_student: Some(student),
            comment_author: Some(author),
        }
    }
}

/// rules
///
/// The declarative policy table. Relations in a row are OR-combined: the
/// first satisfied relation grants the action. Superuser appears only where
/// the domain grants it; there is no blanket bypass.
pub fn rules(resource: Resource, action: Action) -> &'static [Relation] {
    use Action::*;
    use Relation::*;
    use Resource::*;

    match (resource, action) {
        (Course, Create) => &[Teacher],
        (Course, List | Retrieve) => &[Superuser, CourseTeacher, CourseStudent],
        (Course, Update | Delete) => &[CourseTeacher],

        (Lecture | Homework, Create | Update | Delete) => &[CourseTeacher],
        (Lecture | Homework, List | Retrieve) => &[Superuser, CourseTeacher, CourseStudent],

        (HomeworkInstance, Create) => &[CourseStudent],
        (HomeworkInstance, List | Retrieve) => &[Superuser, CourseTeacher, InstanceOwner],
        (HomeworkInstance, Update) => &[InstanceOwner],
        (HomeworkInstance, Delete) => &[Superuser],

        (InstanceMark, Create | Update | Delete) => &[CourseTeacher],
        (InstanceMark, List | Retrieve) => &[Superuser, CourseTeacher, InstanceOwner],

        (InstanceComment, Create | List | Retrieve) => &[Superuser, CourseTeacher, InstanceOwner],
        (InstanceComment, Update) => &[CommentAuthor],
        (InstanceComment, Delete) => &[Superuser, CommentAuthor],
    }
}

fn satisfied(relation: Relation, principal: Principal, ancestry: Option<&Ancestry>) -> bool {
    match relation {
        Relation::Superuser => principal.role == Role::Superuser,
        Relation::Teacher => principal.role == Role::Teacher,
        Relation::CourseTeacher => {
            principal.role == Role::Teacher
                && ancestry.is_some_and(|a| a.course.teachers.contains(&principal.id))
        }
        Relation::CourseStudent => {
            principal.role == Role::Student
                && ancestry.is_some_and(|a| a.course.students.contains(&principal.id))
        }
        Relation::InstanceOwner => {
            principal.role == Role::Student
                && ancestry.and_then(|a| a.instance_student) == Some(principal.id)
        }
        Relation::CommentAuthor => {
            ancestry.and_then(|a| a.comment_author) == Some(principal.id)
        }
    }
}

/// Deny
///
/// A refused action. Denials are surfaced to callers uniformly as a generic
/// access-denied error; the resource/action detail exists for log lines
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deny {
    pub resource: Resource,
    pub action: Action,
}

/// authorize
///
/// True when any relation in the table row holds for this principal.
pub fn authorize(
    principal: Principal,
    action: Action,
    resource: Resource,
    ancestry: Option<&Ancestry>,
) -> bool {
    rules(resource, action)
        .iter()
        .any(|relation| satisfied(*relation, principal, ancestry))
}

/// check
///
/// The `Result` form of `authorize`, used by every mutation orchestration
/// step between ancestor resolution and validation.
pub fn check(
    principal: Principal,
    action: Action,
    resource: Resource,
    ancestry: Option<&Ancestry>,
) -> Result<(), Deny> {
    if authorize(principal, action, resource, ancestry) {
        Ok(())
    } else {
        Err(Deny { resource, action })
    }
}

/// Scope
///
/// Which rows a principal may enumerate, applied as a pre-filter on every
/// list query. The repository composes it into SQL; `permits_*` are the
/// same predicates in pure form for code paths that already hold the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Superuser: every row.
    All,
    /// Rows whose ancestry course lists this teacher.
    TeacherOf(Uuid),
    /// Course-rooted rows whose course enrolls this student; for
    /// instance-rooted rows, only the student's own instances.
    StudentOf(Uuid),
}

/// scope_filter
///
/// Derives the read scope for a principal. Roles map one-to-one; there is
/// no per-request configuration.
pub fn scope_filter(principal: Principal) -> Scope {
    match principal.role {
        Role::Superuser => Scope::All,
        Role::Teacher => Scope::TeacherOf(principal.id),
        Role::Student => Scope::StudentOf(principal.id),
    }
}

impl Scope {
    /// Visibility of a course-rooted row (course, lecture, homework).
    pub fn permits_course(&self, course: &Course) -> bool {
        match self {
            Scope::All => true,
            Scope::TeacherOf(id) => course.teachers.contains(id),
            Scope::StudentOf(id) => course.students.contains(id),
        }
    }

    /// Visibility of an instance-rooted row (instance, mark, comment). The
    /// student axis narrows from enrollment to ownership: a student never
    /// sees a classmate's submission.
    pub fn permits_instance(&self, course: &Course, instance_student: Uuid) -> bool {
        match self {
            Scope::All => true,
            Scope::TeacherOf(id) => course.teachers.contains(id),
            Scope::StudentOf(id) => instance_student == *id,
        }
    }
}
